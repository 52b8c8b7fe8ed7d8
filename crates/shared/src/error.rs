//! 统一错误处理模块
//!
//! 定义总线、RPC 与事件发布共用的基础设施错误类型。
//! 错误文本会作为 `{"error": ...}` 返回给远端调用方，因此保持英文。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum ServiceError {
    // ==================== 传输错误 ====================
    #[error("kafka error: {0}")]
    Kafka(String),

    #[error("bus error: {0}")]
    Bus(String),

    // ==================== 编解码错误 ====================
    #[error("serialization error: {0}")]
    Serialization(String),

    // ==================== 事件存储错误 ====================
    #[error("could not publish event: {0}")]
    Publish(String),

    // ==================== 生命周期错误 ====================
    #[error("consumer group already started: {0}")]
    AlreadyStarted(String),

    // ==================== 配置错误 ====================
    #[error("config error: {0}")]
    Config(#[from] ::config::ConfigError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Bus(_) => "BUS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Publish(_) => "PUBLISH_ERROR",
            Self::AlreadyStarted(_) => "ALREADY_STARTED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 核心层本身从不重试，这里只为外层（调用方或运维脚本）提供判断依据。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kafka(_) | Self::Bus(_) | Self::Publish(_))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
