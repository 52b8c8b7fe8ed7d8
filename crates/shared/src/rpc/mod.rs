//! 基于消息总线的 RPC 层
//!
//! - `envelope`：请求/应答在总线上的线格式，以及 `{"result"}|{"error"}` 响应信封
//! - `client`：发起调用并按关联 ID 等待应答
//! - `consumer_group`：把命名的命令处理器绑定到服务名，调度入站请求并回复
//!
//! 请求发往 topic `<service>.<command>`，应答发往调用方私有的 reply topic。

pub mod client;
pub mod consumer_group;
pub mod envelope;

pub use client::RpcClient;
pub use consumer_group::{CommandHandler, ConsumerGroup, handler_fn};
pub use envelope::{CommandError, CommandResponse, RpcReply, RpcRequest};

/// 调用超时返回的错误文本
pub const TIMEOUT: &str = "timeout";
/// 命令未注册时返回的错误文本
pub const UNKNOWN_COMMAND: &str = "unknown command";
/// 处理器内部缺陷统一对外返回的错误文本，不泄露细节
pub const INTERNAL_ERROR: &str = "internal error";

tokio::task_local! {
    /// 当前正在调度的请求的关联 ID，由消费组在调用处理器时设置
    pub(crate) static CORRELATION_ID: String;
}

/// 读取当前请求的关联 ID
///
/// 处理器不需要感知关联 ID；事件构造等基础设施代码通过它把产出物与请求串联起来。
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

/// 命令对应的请求 topic
pub fn command_topic(service: &str, command: &str) -> String {
    format!("{service}.{command}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_topic() {
        assert_eq!(
            command_topic("menu-service", "create_menus"),
            "menu-service.create_menus"
        );
    }

    #[tokio::test]
    async fn test_correlation_id_scope() {
        assert!(current_correlation_id().is_none());

        let seen = CORRELATION_ID
            .scope("corr-42".to_string(), async { current_correlation_id() })
            .await;
        assert_eq!(seen.as_deref(), Some("corr-42"));
    }
}
