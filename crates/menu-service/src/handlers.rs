//! 菜单命令处理器
//!
//! 状态机：nonexistent -> created -> updated* -> deleted。
//! 处理器本身无状态，读取经由 `ReadModel`，写入只通过 `EventPublisher` 发布事件。

use std::sync::Arc;

use async_trait::async_trait;
use menu_shared::events::{EventPublisher, EventType, create_event};
use menu_shared::rpc::{CommandError, CommandHandler};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::MenuError;
use crate::model::{CreateMenus, DeleteMenu, Menu, UpdateMenu, parse_object};
use crate::read_model::ReadModel;

/// 菜单事件所在的 stream
pub const MENU_STREAM: &str = "menu";

/// 菜单命令处理逻辑
pub struct MenuHandlers {
    read_model: Arc<dyn ReadModel>,
    publisher: Arc<dyn EventPublisher>,
}

impl MenuHandlers {
    pub fn new(read_model: Arc<dyn ReadModel>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            read_model,
            publisher,
        }
    }

    /// 创建一个或多个菜单，返回按请求顺序排列的新 ID
    ///
    /// 逐条校验并发布；某条缺少必填字段时立即返回错误，之前已发布的事件不回滚。
    pub async fn create_menus(&self, body: Value) -> Result<Value, MenuError> {
        let drafts = CreateMenus::from_body(body)?.into_drafts();
        let mut ids = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let menu = draft.into_menu()?;
            self.emit(EventType::EntityCreated, &menu).await?;
            ids.push(menu.entity_id);
        }

        info!(count = ids.len(), "菜单已创建");
        Ok(json!(ids))
    }

    /// 修改菜单的名称与价格
    pub async fn update_menu(&self, body: Value) -> Result<Value, MenuError> {
        let request: UpdateMenu = parse_object(body)?;
        let entity_id = request.entity_id.ok_or(MenuError::MissingEntityId)?;

        let mut menu = self.lookup(&entity_id).await?;

        let (Some(name), Some(price)) = (request.name, request.price) else {
            return Err(MenuError::MissingNameOrPrice);
        };
        menu.entity_id = entity_id;
        menu.name = name;
        menu.price = price;

        self.emit(EventType::EntityUpdated, &menu).await?;

        info!(entity_id = %menu.entity_id, "菜单已修改");
        Ok(Value::Bool(true))
    }

    /// 删除菜单，事件负载为读模型中的当前实体
    pub async fn delete_menu(&self, body: Value) -> Result<Value, MenuError> {
        let request: DeleteMenu = parse_object(body)?;
        let entity_id = request.entity_id.ok_or(MenuError::MissingEntityId)?;

        let menu = self.lookup(&entity_id).await?;
        self.emit(EventType::EntityDeleted, &menu).await?;

        info!(entity_id = %menu.entity_id, "菜单已删除");
        Ok(Value::Bool(true))
    }

    async fn lookup(&self, entity_id: &str) -> Result<Menu, MenuError> {
        self.read_model
            .get_menu(entity_id)
            .await?
            .ok_or(MenuError::NotFound)
    }

    async fn emit(&self, event_type: EventType, menu: &Menu) -> Result<(), MenuError> {
        let event = create_event(event_type, menu.to_payload());
        let event_id = event.metadata.event_id.clone();

        self.publisher
            .publish(MENU_STREAM, event)
            .await
            .map_err(|e| MenuError::EventStore(e.to_string()))?;

        metrics::counter!("menu_events_total", "type" => event_type.as_str()).increment(1);
        debug!(
            entity_id = %menu.entity_id,
            event_type = %event_type,
            event_id = %event_id,
            "菜单事件已发布"
        );
        Ok(())
    }
}

/// 菜单服务对外暴露的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuCommand {
    CreateMenus,
    UpdateMenu,
    DeleteMenu,
}

impl MenuCommand {
    pub const ALL: [MenuCommand; 3] = [Self::CreateMenus, Self::UpdateMenu, Self::DeleteMenu];

    /// 总线上的命令名
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateMenus => "create_menus",
            Self::UpdateMenu => "update_menu",
            Self::DeleteMenu => "delete_menu",
        }
    }
}

/// 把单个菜单命令适配为消费组的命令处理器
pub struct MenuCommandHandler {
    handlers: Arc<MenuHandlers>,
    command: MenuCommand,
}

impl MenuCommandHandler {
    pub fn new(handlers: Arc<MenuHandlers>, command: MenuCommand) -> Self {
        Self { handlers, command }
    }
}

#[async_trait]
impl CommandHandler for MenuCommandHandler {
    async fn handle(&self, body: Value) -> Result<Value, CommandError> {
        let result = match self.command {
            MenuCommand::CreateMenus => self.handlers.create_menus(body).await,
            MenuCommand::UpdateMenu => self.handlers.update_menu(body).await,
            MenuCommand::DeleteMenu => self.handlers.delete_menu(body).await,
        };

        result.map_err(|err| {
            if err.is_validation() {
                debug!(command = self.command.name(), error = %err, "请求校验失败");
            } else {
                warn!(command = self.command.name(), error = %err, "命令执行失败");
            }
            err.into()
        })
    }
}
