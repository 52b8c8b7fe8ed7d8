//! 领域事件模型与事件发布
//!
//! 定义发往事件存储的统一事件信封，以及 `EventPublisher` trait。
//! 核心层只负责构造并发布事件，不做事件回放与状态重建。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusMessage, CORRELATION_ID_HEADER, MessageBus};
use crate::config::EventStoreConfig;
use crate::error::ServiceError;
use crate::rpc::current_correlation_id;

/// 事件类型 header，便于下游在不解析负载的情况下过滤
pub const EVENT_TYPE_HEADER: &str = "event-type";

// ---------------------------------------------------------------------------
// EventType：事件类型枚举
// ---------------------------------------------------------------------------

/// 实体生命周期事件：created -> updated* -> deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "entity_created",
            Self::EntityUpdated => "entity_updated",
            Self::EntityDeleted => "entity_deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event：事件信封
// ---------------------------------------------------------------------------

/// 事件元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 事件唯一标识（UUID v7），时间有序便于索引
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    /// 触发本事件的 RPC 请求的关联 ID，非 RPC 上下文中为 None
    pub correlation_id: Option<String>,
}

/// 事件信封，发布后即不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
    pub metadata: EventMetadata,
}

impl Event {
    /// 负载中的实体 ID（若有）
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("entity_id").and_then(Value::as_str)
    }
}

/// 构造事件
///
/// 除了读取当前时间、生成 event_id 以及当前请求的关联 ID 外没有其他副作用。
pub fn create_event(event_type: EventType, payload: Value) -> Event {
    Event {
        event_type,
        payload,
        metadata: EventMetadata {
            event_id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            correlation_id: current_correlation_id(),
        },
    }
}

// ---------------------------------------------------------------------------
// EventPublisher：事件发布
// ---------------------------------------------------------------------------

/// 事件存储的写入端口
///
/// 传输层拒收时返回 `ServiceError::Publish`，核心层不做重试。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, stream: &str, event: Event) -> Result<(), ServiceError>;
}

/// 基于消息总线的事件发布器
///
/// stream 映射为 `<topic_prefix><stream>`；以实体 ID 作为消息 key，
/// 同一实体的事件落在同一分区，保证顺序。
pub struct BusEventPublisher {
    bus: Arc<dyn MessageBus>,
    topic_prefix: String,
}

impl BusEventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, config: &EventStoreConfig) -> Self {
        Self {
            bus,
            topic_prefix: config.topic_prefix.clone(),
        }
    }

    pub fn topic_for(&self, stream: &str) -> String {
        format!("{}{}", self.topic_prefix, stream)
    }
}

#[async_trait]
impl EventPublisher for BusEventPublisher {
    async fn publish(&self, stream: &str, event: Event) -> Result<(), ServiceError> {
        let topic = self.topic_for(stream);
        let key = event
            .entity_id()
            .map(str::to_string)
            .unwrap_or_else(|| event.metadata.event_id.clone());

        let payload = serde_json::to_vec(&event)?;

        let mut message = BusMessage::new(topic.clone(), key.clone(), payload)
            .with_header(EVENT_TYPE_HEADER, event.event_type.as_str());
        if let Some(correlation_id) = &event.metadata.correlation_id {
            message = message.with_header(CORRELATION_ID_HEADER, correlation_id.clone());
        }

        self.bus.publish(message).await.map_err(|e| {
            warn!(topic = %topic, event_type = %event.event_type, error = %e, "事件发布失败");
            ServiceError::Publish(e.to_string())
        })?;

        debug!(
            topic = %topic,
            key = %key,
            event_type = %event.event_type,
            event_id = %event.metadata.event_id,
            "事件已发布"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_bus::InMemoryBus;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = create_event(
            EventType::EntityCreated,
            json!({"entity_id": "m-1", "name": "pizza", "price": 9.5}),
        );
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["type"], "entity_created");
        assert_eq!(wire["payload"]["name"], "pizza");
        assert!(wire["metadata"]["event_id"].is_string());
        assert!(wire["metadata"]["timestamp"].is_string());
        // 不在 RPC 调度上下文中
        assert!(wire["metadata"]["correlation_id"].is_null());
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::EntityUpdated.to_string(), "entity_updated");
        assert_eq!(
            serde_json::to_value(EventType::EntityDeleted).unwrap(),
            json!("entity_deleted")
        );
    }

    #[tokio::test]
    async fn test_bus_publisher_routes_by_stream() {
        let bus = Arc::new(InMemoryBus::new());
        let mut events = bus
            .subscribe(&["event-store.menu".to_string()], "observer")
            .await
            .unwrap();

        let publisher = BusEventPublisher::new(bus.clone(), &EventStoreConfig::default());
        let event = create_event(EventType::EntityDeleted, json!({"entity_id": "m-7"}));
        publisher.publish("menu", event.clone()).await.unwrap();

        let msg = events.recv().await.unwrap();
        assert_eq!(msg.key.as_deref(), Some("m-7"));
        assert_eq!(msg.headers.get(EVENT_TYPE_HEADER).unwrap(), "entity_deleted");

        let received: Event = msg.deserialize_payload().unwrap();
        assert_eq!(received, event);
    }
}
