//! 内存消息总线
//!
//! 用于测试和本地开发，不依赖任何外部 broker。
//! 语义与 Kafka 实现保持一致：同一消费组内每条消息只投递给一个订阅者，
//! 不同消费组各自收到一份；没有订阅者的 topic 上的消息直接丢弃。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{BusMessage, MessageBus, SUBSCRIPTION_BUFFER, Subscription};
use crate::error::ServiceError;

#[derive(Debug)]
struct Subscriber {
    group: String,
    sender: mpsc::Sender<BusMessage>,
}

/// 内存 pub/sub 总线
#[derive(Debug, Default)]
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前 topic 上仍然存活的订阅数量
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: BusMessage) -> Result<(), ServiceError> {
        // 锁内只挑选投递目标，发送放到锁外，避免持锁跨 await
        let targets: Vec<mpsc::Sender<BusMessage>> = {
            let mut topics = self.topics.lock();
            let Some(subs) = topics.get_mut(&message.topic) else {
                debug!(topic = %message.topic, "topic 无订阅者，消息丢弃");
                return Ok(());
            };

            // 顺带清理已退订的接收端
            subs.retain(|s| !s.sender.is_closed());

            let mut groups = HashSet::new();
            subs.iter()
                .filter(|s| groups.insert(s.group.clone()))
                .map(|s| s.sender.clone())
                .collect()
        };

        for sender in targets {
            if sender.send(message.clone()).await.is_err() {
                debug!(topic = %message.topic, "订阅者已退订，跳过");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
    ) -> Result<Subscription, ServiceError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let mut map = self.topics.lock();
        for topic in topics {
            map.entry(topic.clone()).or_default().push(Subscriber {
                group: group.to_string(),
                sender: tx.clone(),
            });
        }

        Ok(Subscription::new(rx))
    }
}
