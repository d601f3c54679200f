//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::env::EnvConfig;
use crate::infra::docker::{ContainerRuntime, DockerCli};
use crate::services::exposer::TunnelExposer;
use crate::services::inventory::ContainerInventory;

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN.get_or_init(CancellationToken::new).clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 应用状态
pub struct AppState {
    /// API 密钥（用于验证请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
    /// 容器运行时
    pub runtime: Arc<dyn ContainerRuntime>,
    /// 隧道暴露控制器
    pub exposer: Arc<TunnelExposer>,
    /// 容器清单
    pub inventory: Arc<ContainerInventory>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new() -> Self {
        let config = EnvConfig::from_env();

        tracing::info!(
            api_key_len = config.api_key.len(),
            port = config.port,
            docker_path = %config.docker_path,
            tunnel_image = %config.tunnel.image,
            poll_interval_ms = config.tunnel.poll_interval_ms,
            "Loaded configuration"
        );

        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerCli::new(config.docker_path.clone()));
        let exposer = Arc::new(TunnelExposer::new(runtime.clone(), config.tunnel.clone()));
        let inventory = Arc::new(ContainerInventory::new(runtime.clone()));

        Self {
            api_key: config.api_key.clone(),
            started_at: Utc::now(),
            runtime,
            exposer,
            inventory,
            config,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
