//! 消息总线抽象
//!
//! RPC 层只依赖这里定义的 `MessageBus` trait：生产环境由 Kafka 实现，
//! 测试与本地开发使用内存实现。消息统一为拥有所有权的 `BusMessage`，
//! 可以安全地跨 await 点和任务边界传递。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::ServiceError;

/// 每个订阅的本地缓冲区大小
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// 请求/应答/事件消息上携带关联 ID 的 header 名
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// 总线上流转的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
            payload,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str, ServiceError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| ServiceError::Bus(format!("payload is not utf-8: {e}")))
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ServiceError::Serialization(format!("invalid payload: {e}")))
    }
}

/// 一次订阅
///
/// 丢弃或 `close()` 即视为退订：底层实现会在发现接收端关闭后停止投递。
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { receiver }
    }

    /// 等待下一条消息，总线关闭时返回 None
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// 非阻塞地取出一条已到达的消息
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// 传输无关的消息总线
///
/// - `publish` 把消息投递到 topic，不等待任何消费方
/// - `subscribe` 以消费组身份订阅一组 topic；同一消费组内每条消息只投递一次，
///   不同消费组各自收到一份
///
/// 实现必须是 `Send + Sync`，由组合根以 `Arc<dyn MessageBus>` 注入各组件共享。
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: BusMessage) -> Result<(), ServiceError>;

    async fn subscribe(&self, topics: &[String], group: &str)
    -> Result<Subscription, ServiceError>;
}
