//! 菜单命令服务
//!
//! 通过消息总线 RPC 接收菜单的创建、修改、删除命令，校验后向事件存储发布领域事件。
//! 读取现有菜单时经由 RPC 查询独立的读模型服务。

pub mod error;
pub mod handlers;
pub mod model;
pub mod read_model;
pub mod service;

pub use error::MenuError;
pub use handlers::{MenuCommand, MenuCommandHandler, MenuHandlers};
pub use model::Menu;
pub use read_model::{ReadModel, RpcReadModel};
pub use service::{MenuService, SERVICE_NAME};
