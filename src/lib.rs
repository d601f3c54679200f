//! Port Tunnel Agent - 容器端口公网暴露代理
//!
//! 把本机容器发布的端口通过隧道 sidecar 暴露到公网，并维护一份随容器
//! 启停实时刷新的容器清单。

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::state::app_state::{get_shutdown_token, trigger_shutdown};
use crate::state::AppState;

/// 运行时配置（命令行层面）
#[derive(Debug, Default)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
}

/// 初始化并运行 agent
pub async fn init_and_run_agent_with_config(runtime_config: RuntimeConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = Arc::new(AppState::new());
    let port = runtime_config.port_override.unwrap_or(state.config.port);

    // 容器生命周期 watcher 随 agent 长驻
    let shutdown = get_shutdown_token();
    tokio::spawn(state.inventory.clone().run(shutdown.clone()));

    let app = api::router(state);
    let addr = format!("0.0.0.0:{}", port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind listener");
            return;
        }
    };

    tracing::info!(
        addr = %addr,
        version = config::env::constants::VERSION,
        "port-tunnel-agent listening"
    );

    let serve_shutdown = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = serve_shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl-C, shutting down");
                    trigger_shutdown();
                }
            }
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Server error");
    }
}
