//! 菜单领域模型与命令请求体

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::MenuError;

/// 菜单实体
///
/// `entity_id` 创建后不可变；读模型返回的额外字段原样保留在 `extra` 中，
/// 发布事件时一并带上。价格保持 JSON 数值原样（整数不会变成浮点）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub entity_id: String,
    pub name: String,
    pub price: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Menu {
    /// 以新分配的 UUID v4 创建菜单
    pub fn create(name: String, price: Number) -> Self {
        Self {
            entity_id: Uuid::new_v4().to_string(),
            name,
            price,
            extra: Map::new(),
        }
    }

    /// 事件负载
    pub fn to_payload(&self) -> Value {
        let mut payload = self.extra.clone();
        payload.insert("entity_id".to_string(), Value::from(self.entity_id.clone()));
        payload.insert("name".to_string(), Value::from(self.name.clone()));
        payload.insert("price".to_string(), Value::Number(self.price.clone()));
        Value::Object(payload)
    }
}

/// 创建请求中的单个菜单
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MenuDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Number>,
}

impl MenuDraft {
    /// 校验必填字段并生成实体
    pub fn into_menu(self) -> Result<Menu, MenuError> {
        match (self.name, self.price) {
            (Some(name), Some(price)) => Ok(Menu::create(name, price)),
            _ => Err(MenuError::MissingNameOrPrice),
        }
    }
}

/// create_menus 请求体：单个对象或对象列表
#[derive(Debug, Clone, PartialEq)]
pub enum CreateMenus {
    Single(MenuDraft),
    Batch(Vec<MenuDraft>),
}

impl CreateMenus {
    /// 一次性解析请求体的形状，之后按顺序处理
    pub fn from_body(body: Value) -> Result<Self, MenuError> {
        match body {
            Value::Object(_) => Ok(Self::Single(serde_json::from_value(body)?)),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| parse_batch_item(index, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Batch),
            other => Err(MenuError::InvalidBody(format!(
                "expected an object or a list of objects, got {}",
                kind_of(&other)
            ))),
        }
    }

    pub fn into_drafts(self) -> Vec<MenuDraft> {
        match self {
            Self::Single(draft) => vec![draft],
            Self::Batch(drafts) => drafts,
        }
    }
}

fn parse_batch_item(index: usize, item: Value) -> Result<MenuDraft, MenuError> {
    if !item.is_object() {
        return Err(MenuError::InvalidBody(format!(
            "item {index}: expected an object, got {}",
            kind_of(&item)
        )));
    }
    serde_json::from_value(item)
        .map_err(|e| MenuError::InvalidBody(format!("item {index}: {e}")))
}

/// update_menu 请求体
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateMenu {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Number>,
}

/// delete_menu 请求体
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteMenu {
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// 把请求体解析为单个对象形式的命令
pub fn parse_object<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, MenuError> {
    if !body.is_object() {
        return Err(MenuError::InvalidBody(format!(
            "expected an object, got {}",
            kind_of(&body)
        )));
    }
    Ok(serde_json::from_value(body)?)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
