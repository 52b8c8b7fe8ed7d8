//! 菜单服务错误类型
//!
//! 每个变体的 Display 即返回给调用方的 `{"error": ...}` 文本，保持英文且稳定。

use menu_shared::rpc::CommandError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MenuError {
    // ==================== 校验错误 ====================
    #[error("missing mandatory parameter 'name' and/or 'price'")]
    MissingNameOrPrice,

    #[error("missing mandatory parameter 'entity_id'")]
    MissingEntityId,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    // ==================== 业务错误 ====================
    #[error("could not find menu")]
    NotFound,

    // ==================== 上游错误 ====================
    #[error("{0} (from read-model)")]
    ReadModel(String),

    #[error("{0} (from event-store)")]
    EventStore(String),
}

impl MenuError {
    /// 是否为调用方输入问题（相对于上游失败）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingNameOrPrice | Self::MissingEntityId | Self::InvalidBody(_)
        )
    }
}

impl From<MenuError> for CommandError {
    fn from(err: MenuError) -> Self {
        CommandError::Rejected(err.to_string())
    }
}

impl From<serde_json::Error> for MenuError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidBody(err.to_string())
    }
}
