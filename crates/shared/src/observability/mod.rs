//! 统一可观测性模块
//!
//! 所有服务通过单一入口点初始化日志与指标，确保一致的指标命名。

pub mod metrics;
pub mod tracing;

use std::net::SocketAddr;

use ::tracing::info;
use anyhow::Result;

use crate::config::AppConfig;

/// 可观测性资源守卫
///
/// main 返回前保持存活，drop 时记录关闭日志。
pub struct ObservabilityGuard {
    metrics_addr: Option<SocketAddr>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self { metrics_addr: None }
    }

    /// Prometheus 抓取地址，未启用指标时为 None
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（Prometheus 指标，`observability.metrics_enabled` 为 true 时）
///
/// # Example
///
/// ```ignore
/// use menu_shared::{config::AppConfig, observability};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("menu-service")?;
///     let _guard = observability::init(&config)?;
///
///     // 应用逻辑...
///
///     Ok(())
/// }
/// ```
pub fn init(config: &AppConfig) -> Result<ObservabilityGuard> {
    tracing::init(&config.observability)?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        log_format = %config.observability.log_format,
        "Observability initialized"
    );

    let metrics_addr = if config.observability.metrics_enabled {
        Some(metrics::init(&config.service_name, &config.observability)?)
    } else {
        None
    };

    Ok(ObservabilityGuard { metrics_addr })
}
