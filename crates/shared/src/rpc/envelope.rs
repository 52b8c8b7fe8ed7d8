//! RPC 线格式
//!
//! 处理器内部使用 `Result<Value, CommandError>`，只有在总线边界才序列化为
//! `{"result": ...}` 或 `{"error": "..."}`。传输层本身不区分成功帧与失败帧，
//! 由负载形状表达结果。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 请求信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub correlation_id: String,
    /// 应答 topic，为空表示调用方不关心应答
    #[serde(default)]
    pub reply_to: String,
    pub command: String,
    #[serde(default)]
    pub body: Value,
}

/// 应答信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub correlation_id: String,
    pub response: CommandResponse,
}

/// 命令响应：恰好包含 `result` 或 `error` 其中一个键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandResponse {
    Result(Value),
    Error(String),
}

impl CommandResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(message) => Err(message),
        }
    }
}

impl From<Result<Value, String>> for CommandResponse {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => Self::Result(value),
            Err(message) => Self::Error(message),
        }
    }
}

/// 处理器失败的两种类别
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// 校验失败或上游失败，消息原样返回给调用方
    #[error("{0}")]
    Rejected(String),

    /// 缺陷类失败，记录日志后以 "internal error" 回复
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_wire_shape() {
        let ok = CommandResponse::Result(json!(["id-1", "id-2"]));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"result": ["id-1", "id-2"]}));

        let err = CommandResponse::error("could not find menu");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": "could not find menu"})
        );
    }

    #[test]
    fn test_response_null_result() {
        let parsed: CommandResponse = serde_json::from_value(json!({"result": null})).unwrap();
        assert_eq!(parsed, CommandResponse::Result(Value::Null));
        assert!(!parsed.is_error());
    }

    #[test]
    fn test_response_rejects_both_keys_missing() {
        assert!(serde_json::from_value::<CommandResponse>(json!({})).is_err());
    }

    #[test]
    fn test_request_defaults() {
        let parsed: RpcRequest = serde_json::from_value(json!({
            "correlation_id": "c-1",
            "command": "delete_menu"
        }))
        .unwrap();

        assert!(parsed.reply_to.is_empty());
        assert_eq!(parsed.body, Value::Null);
    }
}
