//! 共享库
//!
//! 包含所有服务共用的配置、错误处理、消息总线、RPC、事件发布与可观测性等基础设施代码。

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod kafka;
pub mod memory_bus;
pub mod observability;
pub mod rpc;
pub mod test_utils;
