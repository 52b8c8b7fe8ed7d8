//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 导出器自带 HTTP 监听，供 Prometheus 抓取。

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::ObservabilityConfig;

/// 安装 Prometheus recorder 并在指定端口暴露指标，返回监听地址
///
/// 需要在 tokio 运行时内调用。
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    ::metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
    tokio::spawn(exporter);

    register_common_metrics(service_name);
    info!("Metrics exporter listening on {}", addr);

    Ok(addr)
}

/// 描述 RPC 层指标，出现在抓取结果的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "rpc_commands_total",
        "Total number of dispatched RPC commands"
    );
    metrics::describe_histogram!(
        "rpc_command_duration_seconds",
        "RPC command handling duration in seconds"
    );
    metrics::describe_counter!("menu_events_total", "Total number of published menu events");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}
