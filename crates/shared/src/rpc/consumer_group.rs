//! 消费组：命令处理器的注册、调度与生命周期
//!
//! 一个消费组把若干 `(命令名, 处理器)` 绑定到一个服务名上：
//! - `start()` 订阅每个命令对应的 `<service>.<command>` topic
//! - 每条入站请求在独立任务中执行，并发上限由信号量控制
//! - 处理器 panic 或返回 `CommandError::Internal` 时只影响当前请求
//! - `stop()` 停止接收新请求并等待在途请求完成，`wait()` 用于主流程挂起

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::envelope::{CommandError, CommandResponse, RpcReply, RpcRequest};
use super::{CORRELATION_ID, INTERNAL_ERROR, UNKNOWN_COMMAND, command_topic};
use crate::bus::{BusMessage, CORRELATION_ID_HEADER, MessageBus, Subscription};
use crate::error::ServiceError;

/// 默认并发上限
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// 命令处理器
///
/// 处理器之间不共享可变状态，同一命令可能被并发重入。
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, body: Value) -> Result<Value, CommandError>;
}

/// 闭包形式的处理器
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CommandError>> + Send + 'static,
{
    async fn handle(&self, body: Value) -> Result<Value, CommandError> {
        (self.0)(body).await
    }
}

/// 把异步闭包包装成处理器
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CommandError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type Handlers = HashMap<String, Arc<dyn CommandHandler>>;

/// 消费组
pub struct ConsumerGroup {
    service_name: String,
    bus: Arc<dyn MessageBus>,
    handlers: Handlers,
    max_in_flight: usize,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    terminated: watch::Sender<bool>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerGroup {
    pub fn new(service_name: impl Into<String>, bus: Arc<dyn MessageBus>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (terminated, _) = watch::channel(false);
        Self {
            service_name: service_name.into(),
            bus,
            handlers: HashMap::new(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            started: AtomicBool::new(false),
            shutdown,
            terminated,
            run_loop: Mutex::new(None),
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        // 上限为 0 会让消费循环永远拿不到许可
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// 注册命令处理器，同名命令后注册的覆盖先注册的
    pub fn register(
        mut self,
        command: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        self.handlers.insert(command.into(), handler);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }

    /// 订阅所有命令 topic 并启动消费循环
    ///
    /// 只订阅已注册命令的 topic：调用未注册的命令时请求无人消费，调用方只会等到超时。
    /// `unknown command` 应答只出现在请求 topic 与信封中的命令名不一致时。
    ///
    /// 只能调用一次，重复调用返回 `AlreadyStarted`。
    pub async fn start(&self) -> Result<(), ServiceError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyStarted(self.service_name.clone()));
        }

        let topics: Vec<String> = self
            .commands()
            .into_iter()
            .map(|command| command_topic(&self.service_name, command))
            .collect();

        let subscription = match self.bus.subscribe(&topics, &self.service_name).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let dispatcher = Arc::new(Dispatcher {
            service_name: self.service_name.clone(),
            bus: self.bus.clone(),
            handlers: self.handlers.clone(),
        });

        let handle = tokio::spawn(run_loop(
            dispatcher,
            subscription,
            self.shutdown.subscribe(),
            self.max_in_flight,
        ));
        *self.run_loop.lock() = Some(handle);

        info!(
            service = %self.service_name,
            ?topics,
            max_in_flight = self.max_in_flight,
            "消费组已启动"
        );
        Ok(())
    }

    /// 停止接收新请求，等待在途请求完成并发出应答后返回
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let handle = self.run_loop.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(service = %self.service_name, error = %e, "消费循环异常退出");
        }

        self.terminated.send_replace(true);
        info!(service = %self.service_name, "消费组已停止");
    }

    /// 挂起直到 `stop()` 被调用且清理完成
    pub async fn wait(&self) {
        let mut terminated = self.terminated.subscribe();
        // sender 由 self 持有，不会在等待期间被 drop
        let _ = terminated.wait_for(|done| *done).await;
    }
}

/// 等待关闭信号；sender 被 drop 同样视为关闭
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// 消费循环
///
/// 先取得并发许可再拉取消息：达到上限时不再从订阅中取消息，由总线缓冲承接背压。
async fn run_loop(
    dispatcher: Arc<Dispatcher>,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
    max_in_flight: usize,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let mut in_flight = JoinSet::new();

    loop {
        while let Some(result) = in_flight.try_join_next() {
            report_task_result(&dispatcher.service_name, result);
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let message = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            next = subscription.recv() => match next {
                Some(message) => message,
                None => {
                    warn!(service = %dispatcher.service_name, "请求订阅意外结束");
                    break;
                }
            },
        };

        let dispatcher = dispatcher.clone();
        in_flight.spawn(async move {
            dispatcher.dispatch(message).await;
            drop(permit);
        });
    }

    // 退订后不再有新消息进入，但已进入缓冲区的请求可能已在 broker 侧提交，必须处理完
    subscription.close();
    let mut drained = 0usize;
    loop {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let Some(message) = subscription.recv().await else {
            break;
        };
        drained += 1;

        let dispatcher = dispatcher.clone();
        in_flight.spawn(async move {
            dispatcher.dispatch(message).await;
            drop(permit);
        });
    }
    drop(subscription);

    if drained > 0 {
        info!(service = %dispatcher.service_name, drained, "已处理退订前缓冲的请求");
    }

    if !in_flight.is_empty() {
        info!(
            service = %dispatcher.service_name,
            in_flight = in_flight.len(),
            "等待在途请求完成"
        );
    }
    while let Some(result) = in_flight.join_next().await {
        report_task_result(&dispatcher.service_name, result);
    }
}

fn report_task_result(service: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(service, error = %e, "调度任务异常结束");
    }
}

/// 单条请求的调度逻辑，由所有调度任务共享（只读）
struct Dispatcher {
    service_name: String,
    bus: Arc<dyn MessageBus>,
    handlers: Handlers,
}

impl Dispatcher {
    async fn dispatch(&self, message: BusMessage) {
        let request: RpcRequest = match message.deserialize_payload() {
            Ok(request) => request,
            Err(e) => {
                // 读不出 reply_to 就无从应答，只能记录后丢弃
                warn!(
                    service = %self.service_name,
                    topic = %message.topic,
                    error = %e,
                    "无法解析的请求，已丢弃"
                );
                return;
            }
        };

        let RpcRequest {
            correlation_id,
            reply_to,
            command,
            body,
        } = request;

        debug!(
            service = %self.service_name,
            command = %command,
            correlation_id = %correlation_id,
            "收到命令请求"
        );

        let started = Instant::now();
        let response = self.invoke(&command, &correlation_id, body).await;
        let outcome = if response.is_error() { "error" } else { "ok" };

        metrics::counter!(
            "rpc_commands_total",
            "service" => self.service_name.clone(),
            "command" => command.clone(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!(
            "rpc_command_duration_seconds",
            "service" => self.service_name.clone(),
            "command" => command.clone()
        )
        .record(started.elapsed().as_secs_f64());

        self.reply(&correlation_id, &reply_to, response).await;
    }

    async fn invoke(&self, command: &str, correlation_id: &str, body: Value) -> CommandResponse {
        let Some(handler) = self.handlers.get(command) else {
            warn!(
                service = %self.service_name,
                command,
                correlation_id,
                "未注册的命令"
            );
            return CommandResponse::error(UNKNOWN_COMMAND);
        };

        let call = AssertUnwindSafe(handler.handle(body)).catch_unwind();
        let outcome = CORRELATION_ID.scope(correlation_id.to_string(), call).await;

        match outcome {
            Ok(Ok(value)) => CommandResponse::Result(value),
            Ok(Err(CommandError::Rejected(message))) => CommandResponse::Error(message),
            Ok(Err(CommandError::Internal(detail))) => {
                error!(
                    service = %self.service_name,
                    command,
                    correlation_id,
                    detail = %detail,
                    "命令处理内部错误"
                );
                CommandResponse::error(INTERNAL_ERROR)
            }
            Err(panic) => {
                error!(
                    service = %self.service_name,
                    command,
                    correlation_id,
                    panic = %panic_message(&*panic),
                    "命令处理器 panic"
                );
                CommandResponse::error(INTERNAL_ERROR)
            }
        }
    }

    async fn reply(&self, correlation_id: &str, reply_to: &str, response: CommandResponse) {
        if reply_to.is_empty() {
            debug!(correlation_id, "请求未指定 reply_to，不发送应答");
            return;
        }

        let reply = RpcReply {
            correlation_id: correlation_id.to_string(),
            response,
        };
        let payload = match serde_json::to_vec(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                error!(correlation_id, error = %e, "应答序列化失败");
                return;
            }
        };

        let message = BusMessage::new(reply_to, correlation_id, payload)
            .with_header(CORRELATION_ID_HEADER, correlation_id);

        if let Err(e) = self.bus.publish(message).await {
            error!(
                service = %self.service_name,
                reply_to,
                correlation_id,
                error = %e,
                "发送应答失败，调用方将超时"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
