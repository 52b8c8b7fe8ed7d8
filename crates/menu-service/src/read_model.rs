//! 读模型端口
//!
//! 命令处理只需要按 ID 读取菜单；生产实现经由 RPC 调用读模型服务的 `get_entity`。

use std::sync::Arc;

use async_trait::async_trait;
use menu_shared::rpc::{CommandResponse, RpcClient};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::MenuError;
use crate::model::Menu;

/// 读模型中菜单实体的名称
pub const ENTITY_NAME: &str = "menu";
/// 读模型服务提供的查询命令
pub const GET_ENTITY: &str = "get_entity";

/// 读模型查询接口
///
/// `Ok(None)` 表示实体不存在；`Err` 的文本已带 `(from read-model)` 后缀。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadModel: Send + Sync {
    async fn get_menu(&self, entity_id: &str) -> Result<Option<Menu>, MenuError>;
}

/// 基于 RPC 的读模型客户端
pub struct RpcReadModel {
    client: Arc<RpcClient>,
    service: String,
}

impl RpcReadModel {
    pub fn new(client: Arc<RpcClient>, service: impl Into<String>) -> Self {
        Self {
            client,
            service: service.into(),
        }
    }
}

#[async_trait]
impl ReadModel for RpcReadModel {
    async fn get_menu(&self, entity_id: &str) -> Result<Option<Menu>, MenuError> {
        let body = json!({"name": ENTITY_NAME, "id": entity_id});
        let response = self.client.call(&self.service, GET_ENTITY, body, None).await;

        match response {
            CommandResponse::Result(value) => parse_entity(value, entity_id),
            CommandResponse::Error(message) => {
                debug!(entity_id, error = %message, "读模型查询失败");
                Err(MenuError::ReadModel(message))
            }
        }
    }
}

/// 解析读模型返回的实体
///
/// `null` 与空对象视为不存在；缺少 `entity_id` 时用查询 ID 补全。
pub fn parse_entity(value: Value, entity_id: &str) -> Result<Option<Menu>, MenuError> {
    let mut entity = match value {
        Value::Null => return Ok(None),
        Value::Object(map) if map.is_empty() => return Ok(None),
        Value::Object(map) => map,
        other => {
            return Err(MenuError::ReadModel(format!(
                "malformed entity: expected an object, got {other}"
            )));
        }
    };

    entity
        .entry("entity_id")
        .or_insert_with(|| Value::from(entity_id));

    serde_json::from_value(Value::Object(entity))
        .map(Some)
        .map_err(|e| MenuError::ReadModel(format!("malformed entity: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_not_found() {
        assert_eq!(parse_entity(Value::Null, "m-1").unwrap(), None);
        assert_eq!(parse_entity(json!({}), "m-1").unwrap(), None);
    }

    #[test]
    fn test_parse_entity_fills_missing_id() {
        let menu = parse_entity(json!({"name": "pizza", "price": 9.5}), "m-1")
            .unwrap()
            .unwrap();
        assert_eq!(menu.entity_id, "m-1");
        assert_eq!(menu.name, "pizza");
    }

    #[test]
    fn test_parse_entity_malformed() {
        let err = parse_entity(json!({"name": "pizza"}), "m-1").unwrap_err();
        assert!(err.to_string().starts_with("malformed entity:"));
        assert!(err.to_string().ends_with(" (from read-model)"));

        let err = parse_entity(json!("pizza"), "m-1").unwrap_err();
        assert!(matches!(err, MenuError::ReadModel(_)));
    }
}
