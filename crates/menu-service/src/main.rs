//! 菜单命令服务
//!
//! 从总线消费 `menu-service.*` 命令，向事件存储发布菜单事件。

use std::sync::Arc;

use anyhow::Result;
use menu_shared::{
    bus::MessageBus, config::AppConfig, events::BusEventPublisher, kafka::KafkaBus,
    observability, rpc::RpcClient,
};
use tokio::signal;
use tracing::{error, info, warn};

use menu_service::{MenuHandlers, MenuService, RpcReadModel, SERVICE_NAME};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/{default,env,service}.toml + MENU_ 环境变量
    let config = AppConfig::load(SERVICE_NAME)?;

    // 2. 初始化日志与指标
    let guard = observability::init(&config)?;
    if let Some(addr) = guard.metrics_addr() {
        info!(%addr, "Prometheus metrics enabled");
    }

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        "Configuration loaded"
    );

    // 3. 消息总线
    let bus: Arc<dyn MessageBus> = Arc::new(KafkaBus::new(&config.kafka)?);

    // 4. 读模型 RPC 客户端与事件发布器
    let rpc = Arc::new(
        RpcClient::connect(bus.clone(), SERVICE_NAME, config.rpc.request_timeout()).await?,
    );
    let read_model = Arc::new(RpcReadModel::new(
        rpc.clone(),
        config.rpc.read_model_service.clone(),
    ));
    let publisher = Arc::new(BusEventPublisher::new(bus.clone(), &config.event_store));

    // 5. 注册命令并开始消费
    let handlers = Arc::new(MenuHandlers::new(read_model, publisher));
    let service = Arc::new(MenuService::new(bus, handlers, config.rpc.max_in_flight));
    service.start().await?;

    {
        let service = service.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            service.stop().await;
        });
    }

    service.wait().await;
    rpc.shutdown();

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
