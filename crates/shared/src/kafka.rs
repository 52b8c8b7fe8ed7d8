//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 `MessageBus` 实现：
//! 生产端共享一个 `FutureProducer`，每个订阅独占一个 `StreamConsumer`，
//! 由后台任务把消息转成拥有所有权的 `BusMessage` 转发到订阅通道。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, MessageBus, SUBSCRIPTION_BUFFER, Subscription};
use crate::config::KafkaConfig;
use crate::error::ServiceError;

/// 生产端投递超时
///
/// 5 秒内仍无法投递即视为失败，交给调用方按"错误即数据"处理，而非无限等待。
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// 从 rdkafka 的借用消息构造，提取并拥有所有字段
///
/// `BorrowedMessage` 不能跨 await 持有，转换必须在发送到通道之前完成。
fn from_borrowed(msg: &BorrowedMessage<'_>) -> BusMessage {
    let key = msg
        .key()
        .and_then(|k| std::str::from_utf8(k).ok())
        .map(String::from);

    let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

    let mut headers = HashMap::new();
    if let Some(h) = msg.headers() {
        for idx in 0..h.count() {
            let header = h.get(idx);
            if let Some(raw) = header.value
                && let Ok(value) = std::str::from_utf8(raw)
            {
                headers.insert(header.key.to_string(), value.to_string());
            }
        }
    }

    BusMessage {
        topic: msg.topic().to_string(),
        key,
        payload,
        headers,
    }
}

/// Kafka 消息总线
///
/// 内部的 `FutureProducer` 本身是 Arc 包装的，并发发送无需额外加锁。
pub struct KafkaBus {
    config: KafkaConfig,
    producer: FutureProducer,
}

impl KafkaBus {
    pub fn new(config: &KafkaConfig) -> Result<Self, ServiceError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| ServiceError::Kafka(format!("could not create producer: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            config: config.clone(),
            producer,
        })
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, message: BusMessage) -> Result<(), ServiceError> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &message.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let key = message.key.as_deref().unwrap_or_default();
        let record = FutureRecord::to(&message.topic)
            .key(key)
            .payload(message.payload.as_slice())
            .headers(headers);

        let delivery = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| ServiceError::Kafka(format!("could not send message: {e}")))?;

        debug!(
            topic = %message.topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok(())
    }

    /// 以 `group` 为 group.id 创建独立消费者
    ///
    /// 同一服务的多个实例共享 group.id，请求在实例间负载均衡；
    /// RPC 客户端的应答 topic 使用唯一的 group.id，保证应答只回到发起方。
    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
    ) -> Result<Subscription, ServiceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("group.id", group)
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| ServiceError::Kafka(format!("could not create consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| ServiceError::Kafka(format!("could not subscribe: {e}")))?;

        info!(?topics, group, "已订阅 Kafka topics");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(forward_messages(consumer, tx));

        Ok(Subscription::new(rx))
    }
}

/// 消费循环：把 Kafka 消息转发到订阅通道
///
/// 使用 `tokio::select!` 同时监听消息流和订阅关闭：
/// 订阅方关闭通道后立即退出，consumer 随之 drop 并离开消费组。
async fn forward_messages(consumer: StreamConsumer, tx: mpsc::Sender<BusMessage>) {
    use futures::StreamExt;

    let stream = consumer.stream();
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            // 偏向关闭信号，保证退订后不再拉取新消息
            biased;

            _ = tx.closed() => {
                info!("订阅已关闭，Kafka 消费循环退出");
                break;
            }

            next = stream.next() => {
                let Some(result) = next else {
                    warn!("Kafka 消息流意外结束");
                    break;
                };

                let msg = match result {
                    Ok(borrowed) => from_borrowed(&borrowed),
                    Err(e) => {
                        error!(error = %e, "接收 Kafka 消息出错");
                        continue;
                    }
                };

                debug!(topic = %msg.topic, "收到 Kafka 消息");

                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }
}
