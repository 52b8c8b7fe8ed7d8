//! 测试工具模块
//!
//! 提供集成测试所需的辅助函数与 Mock 实现，用于在没有 Kafka 的情况下
//! 验证事件发布与 RPC 调度。

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::bus::{BusMessage, MessageBus, Subscription};
use crate::error::ServiceError;
use crate::events::{Event, EventPublisher, EventType};

// ==================== 测试数据辅助 ====================

/// 生成唯一的服务名，避免并行测试在同一总线上互相干扰
pub fn unique_service_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

// ==================== Mock 事件发布器 ====================

/// 记录所有发布请求的事件发布器
///
/// 设置失败文本后，发布会返回 `ServiceError::Publish` 且不记录事件。
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Event)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建总是发布失败的发布器
    pub fn failing(message: &str) -> Self {
        let publisher = Self::default();
        publisher.set_failure(Some(message));
        publisher
    }

    /// 切换失败模式，None 恢复正常
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// 已发布的 (stream, event) 列表，按发布顺序
    pub fn published(&self) -> Vec<(String, Event)> {
        self.published.lock().clone()
    }

    /// 已发布的事件，按发布顺序
    pub fn events(&self) -> Vec<Event> {
        self.published
            .lock()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// 指定类型的事件
    pub fn events_of(&self, event_type: EventType) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, stream: &str, event: Event) -> Result<(), ServiceError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(ServiceError::Publish(message));
        }
        self.published.lock().push((stream.to_string(), event));
        Ok(())
    }
}

// ==================== Mock 消息总线 ====================

/// 发布总是失败的总线，订阅委托给内部总线
pub struct UnreachableBus<B> {
    inner: B,
    message: String,
}

impl<B: MessageBus> UnreachableBus<B> {
    pub fn new(inner: B, message: &str) -> Self {
        Self {
            inner,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl<B: MessageBus> MessageBus for UnreachableBus<B> {
    async fn publish(&self, _message: BusMessage) -> Result<(), ServiceError> {
        Err(ServiceError::Bus(self.message.clone()))
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
    ) -> Result<Subscription, ServiceError> {
        self.inner.subscribe(topics, group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event;
    use crate::memory_bus::InMemoryBus;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_publisher_records_in_order() {
        let publisher = RecordingPublisher::new();
        publisher
            .publish("menu", create_event(EventType::EntityCreated, json!({"entity_id": "a"})))
            .await
            .unwrap();
        publisher
            .publish("menu", create_event(EventType::EntityDeleted, json!({"entity_id": "a"})))
            .await
            .unwrap();

        assert_eq!(publisher.len(), 2);
        assert_eq!(publisher.events_of(EventType::EntityDeleted).len(), 1);
        assert_eq!(publisher.published()[0].0, "menu");
    }

    #[tokio::test]
    async fn test_recording_publisher_failure_mode() {
        let publisher = RecordingPublisher::failing("broker down");
        let err = publisher
            .publish("menu", create_event(EventType::EntityCreated, json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "could not publish event: broker down");
        assert!(publisher.is_empty());

        publisher.set_failure(None);
        publisher
            .publish("menu", create_event(EventType::EntityCreated, json!({})))
            .await
            .unwrap();
        assert_eq!(publisher.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_bus_rejects_publish() {
        let bus = UnreachableBus::new(InMemoryBus::new(), "no route to broker");
        let err = bus
            .publish(BusMessage::new("t", "k", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bus error: no route to broker");

        assert!(bus.subscribe(&["t".to_string()], "g").await.is_ok());
    }
}
