//! 环境变量配置加载

use std::env;
use tracing::warn;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 服务监听端口
    pub port: u16,
    /// docker 可执行文件路径
    pub docker_path: String,
    /// 隧道 sidecar 配置
    pub tunnel: TunnelConfig,
}

/// 隧道 sidecar 配置
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    /// sidecar 镜像
    pub image: String,
    /// 凭据注入到 sidecar 的环境变量名
    pub credential_env: String,
    /// 会话容器名前缀
    pub name_prefix: String,
    /// 日志轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 轮询超时（秒），超时后会话判定失败
    pub poll_timeout_secs: u64,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("TUNNEL_AGENT_API_KEY", "API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());
        if env::var("API_KEY").is_ok() {
            warn!("Deprecated environment variable detected. Please use TUNNEL_AGENT_API_KEY");
        }

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9876);

        let docker_path = env::var("DOCKER_PATH").unwrap_or_else(|_| "docker".to_string());

        Self {
            api_key,
            port,
            docker_path,
            tunnel: TunnelConfig::from_env(),
        }
    }
}

impl TunnelConfig {
    /// 从环境变量加载隧道配置
    pub fn from_env() -> Self {
        let image =
            env::var("TUNNEL_IMAGE").unwrap_or_else(|_| "ngrok/ngrok:latest".to_string());

        let credential_env = env::var("TUNNEL_CREDENTIAL_ENV")
            .unwrap_or_else(|_| "NGROK_AUTHTOKEN".to_string());

        let name_prefix =
            env::var("TUNNEL_NAME_PREFIX").unwrap_or_else(|_| "tunnel-agent".to_string());

        let poll_interval_ms = env::var("TUNNEL_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_POLL_INTERVAL_MS);

        let poll_timeout_secs = env::var("TUNNEL_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_POLL_TIMEOUT_SECS);

        Self {
            image,
            credential_env,
            name_prefix,
            poll_interval_ms,
            poll_timeout_secs,
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 默认日志轮询间隔（毫秒）
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// 默认轮询超时（秒）
    pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 120;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        // 设置测试环境变量
        env::set_var("TEST_PRIMARY", "primary_value");
        env::set_var("TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("TEST_PRIMARY", "TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("TEST_PRIMARY", "TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("TEST_FALLBACK");
        assert_eq!(load_with_fallback("TEST_PRIMARY", "TEST_FALLBACK"), None);
    }
}
