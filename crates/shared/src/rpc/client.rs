//! RPC 客户端
//!
//! 每个客户端在创建时订阅一个私有的 reply topic，由后台任务监听应答并按
//! 关联 ID 唤醒对应的调用。调用失败（超时、发送失败）以 `CommandResponse::Error`
//! 返回而不是 `Err`：上游可能暂时不可用，调用方应把它当作数据处理。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::envelope::{CommandResponse, RpcReply, RpcRequest};
use super::{TIMEOUT, command_topic};
use crate::bus::{BusMessage, CORRELATION_ID_HEADER, MessageBus, Subscription};
use crate::error::ServiceError;

/// 客户端关闭后仍在等待的调用收到的错误文本
pub const CLIENT_CLOSED: &str = "rpc client closed";

type PendingCalls = Arc<DashMap<String, oneshot::Sender<CommandResponse>>>;

/// RPC 客户端
///
/// 线程安全，由组合根创建后以 `Arc<RpcClient>` 注入需要远程读取的组件。
pub struct RpcClient {
    bus: Arc<dyn MessageBus>,
    reply_topic: String,
    pending: PendingCalls,
    default_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl RpcClient {
    /// 创建客户端并启动应答监听
    ///
    /// reply topic 形如 `<client_name>.reply.<uuid>`，同时作为消费组名，
    /// 保证多实例部署时应答只会回到发起调用的实例。
    pub async fn connect(
        bus: Arc<dyn MessageBus>,
        client_name: &str,
        default_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let reply_topic = format!("{client_name}.reply.{}", Uuid::new_v4().simple());
        let subscription = bus
            .subscribe(std::slice::from_ref(&reply_topic), &reply_topic)
            .await?;

        let pending: PendingCalls = Arc::new(DashMap::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(listen_for_replies(subscription, pending.clone(), shutdown_rx));

        info!(reply_topic = %reply_topic, ?default_timeout, "RPC 客户端已初始化");

        Ok(Self {
            bus,
            reply_topic,
            pending,
            default_timeout,
            shutdown,
        })
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    /// 尚未收到应答的调用数量
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// 调用远程命令并等待应答
    ///
    /// `timeout` 为 None 时使用客户端默认超时。每次调用只消费一条应答，
    /// 超时后迟到的应答会被监听任务识别为过期并丢弃。
    pub async fn call(
        &self,
        service: &str,
        command: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> CommandResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let request = RpcRequest {
            correlation_id: correlation_id.clone(),
            reply_to: self.reply_topic.clone(),
            command: command.to_string(),
            body,
        };

        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(e) => return CommandResponse::error(format!("could not encode request: {e}")),
        };

        // 先登记再发送，避免应答先于登记到达
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);
        // 无论以何种方式结束（包括调用方中途放弃 future），都注销登记
        let _registration = PendingRegistration {
            pending: &self.pending,
            correlation_id: &correlation_id,
        };

        let topic = command_topic(service, command);
        let message = BusMessage::new(topic.clone(), correlation_id.clone(), payload)
            .with_header(CORRELATION_ID_HEADER, correlation_id.clone());

        if let Err(e) = self.bus.publish(message).await {
            warn!(topic = %topic, correlation_id = %correlation_id, error = %e, "RPC 请求发送失败");
            return CommandResponse::error(e.to_string());
        }

        debug!(topic = %topic, correlation_id = %correlation_id, "RPC 请求已发送");

        let wait = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => CommandResponse::error(CLIENT_CLOSED),
            Err(_) => {
                warn!(
                    topic = %topic,
                    correlation_id = %correlation_id,
                    timeout_ms = wait.as_millis() as u64,
                    "RPC 调用超时"
                );
                CommandResponse::error(TIMEOUT)
            }
        }
    }

    /// 停止应答监听，仍在等待的调用以 `rpc client closed` 结束
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// 一次调用在 pending 表中的登记，drop 时移除
struct PendingRegistration<'a> {
    pending: &'a PendingCalls,
    correlation_id: &'a str,
}

impl Drop for PendingRegistration<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.correlation_id);
    }
}

/// 应答监听循环
///
/// 未登记的关联 ID（已超时、重复投递或根本不属于本客户端）直接丢弃。
async fn listen_for_replies(
    mut subscription: Subscription,
    pending: PendingCalls,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            next = subscription.recv() => {
                let Some(msg) = next else {
                    warn!("应答订阅意外结束");
                    break;
                };

                let reply: RpcReply = match msg.deserialize_payload() {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(topic = %msg.topic, error = %e, "无法解析的 RPC 应答，已丢弃");
                        continue;
                    }
                };

                match pending.remove(&reply.correlation_id) {
                    Some((_, tx)) => {
                        if tx.send(reply.response).is_err() {
                            debug!(correlation_id = %reply.correlation_id, "调用方已放弃等待");
                        }
                    }
                    None => {
                        debug!(correlation_id = %reply.correlation_id, "丢弃过期或重复的应答");
                    }
                }
            }
        }
    }

    subscription.close();
    // 丢弃所有 sender，等待中的调用立即收到 CLIENT_CLOSED
    pending.clear();
    info!("RPC 应答监听已停止");
}
