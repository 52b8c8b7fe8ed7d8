//! 服务组装
//!
//! 把菜单命令注册到名为 `menu-service` 的消费组上，并暴露显式的生命周期：
//! `start` 开始消费，`stop` 停止并等待在途请求，`wait` 挂起直到停止完成。

use std::sync::Arc;

use menu_shared::bus::MessageBus;
use menu_shared::error::ServiceError;
use menu_shared::rpc::ConsumerGroup;
use tracing::info;

use crate::handlers::{MenuCommand, MenuCommandHandler, MenuHandlers};

/// 菜单服务在总线上的服务名
pub const SERVICE_NAME: &str = "menu-service";

pub struct MenuService {
    group: ConsumerGroup,
}

impl MenuService {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        handlers: Arc<MenuHandlers>,
        max_in_flight: usize,
    ) -> Self {
        let group = MenuCommand::ALL.iter().fold(
            ConsumerGroup::new(SERVICE_NAME, bus).with_max_in_flight(max_in_flight),
            |group, command| {
                group.register(
                    command.name(),
                    Arc::new(MenuCommandHandler::new(handlers.clone(), *command)),
                )
            },
        );

        Self { group }
    }

    pub fn commands(&self) -> Vec<&str> {
        self.group.commands()
    }

    pub async fn start(&self) -> Result<(), ServiceError> {
        info!("starting {SERVICE_NAME} ...");
        self.group.start().await
    }

    pub async fn stop(&self) {
        self.group.stop().await;
        info!("{SERVICE_NAME} stopped");
    }

    pub async fn wait(&self) {
        self.group.wait().await;
    }
}
