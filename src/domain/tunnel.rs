//! 隧道会话领域模型
//!
//! 纯数据类型，无 tokio/axum 依赖

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 隧道进程日志中表示隧道就绪的事件名
pub const TUNNEL_STARTED_EVENT: &str = "started tunnel";

/// 凭据脱敏占位符
pub const CREDENTIAL_PLACEHOLDER: &str = "***REDACTED***";

/// 端口暴露请求
#[derive(Clone, Debug, Deserialize)]
pub struct ExposeRequest {
    /// 目标端口，必须是某个容器已发布的端口
    pub port: u16,
    /// 隧道服务商认证凭据，只进入 sidecar 进程环境，不落日志
    #[serde(default)]
    pub credential: String,
}

/// 隧道会话状态机
///
/// `Active` 与 `Failed` 为终态；从终态发起新的 expose 会开启一个全新会话。
#[derive(Clone, Debug, PartialEq)]
pub enum TunnelState {
    Idle,
    Starting,
    Polling,
    Active { url: String },
    Failed { error: String },
}

impl TunnelState {
    pub fn name(&self) -> &'static str {
        match self {
            TunnelState::Idle => "idle",
            TunnelState::Starting => "starting",
            TunnelState::Polling => "polling",
            TunnelState::Active { .. } => "active",
            TunnelState::Failed { .. } => "failed",
        }
    }

    /// 是否为终态（控制器不会再自行迁移）
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Active { .. } | TunnelState::Failed { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            TunnelState::Active { url } => Some(url),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TunnelState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// 单行隧道日志记录
///
/// 隧道进程以每行一个 JSON 对象的格式输出日志；`url` 只在
/// [`TUNNEL_STARTED_EVENT`] 事件上出现。
#[derive(Clone, Debug, Deserialize)]
pub struct TunnelLogRecord {
    pub msg: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl TunnelLogRecord {
    /// 解析一行日志；非 JSON 或写到一半被截断的行返回 `None`
    pub fn decode(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }

    pub fn is_tunnel_started(&self) -> bool {
        self.msg == TUNNEL_STARTED_EVENT
    }
}

/// 隧道状态快照（用于 API 响应）
#[derive(Clone, Debug, Serialize)]
pub struct TunnelStatus {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// 把文本中出现的凭据替换为占位符
///
/// 外部隧道进程可能把凭据回显到日志或错误输出里，任何会被存储或记录的
/// 文本都先经过这里。
pub fn scrub_credential(text: &str, credential: &str) -> String {
    if credential.is_empty() {
        return text.to_string();
    }
    text.replace(credential, CREDENTIAL_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_started_record() {
        let record =
            TunnelLogRecord::decode(r#"{"msg":"started tunnel","url":"https://abcd.example.io"}"#)
                .unwrap();
        assert!(record.is_tunnel_started());
        assert_eq!(record.url.as_deref(), Some("https://abcd.example.io"));
    }

    #[test]
    fn test_decode_plain_record() {
        let record = TunnelLogRecord::decode(r#"{"msg":"open config file"}"#).unwrap();
        assert!(!record.is_tunnel_started());
        assert!(record.url.is_none());
    }

    #[test]
    fn test_decode_truncated_line() {
        assert!(TunnelLogRecord::decode(r#"{"msg":"star"#).is_none());
        assert!(TunnelLogRecord::decode("not json at all").is_none());
        assert!(TunnelLogRecord::decode("").is_none());
    }

    #[test]
    fn test_state_terminal() {
        assert!(!TunnelState::Idle.is_terminal());
        assert!(!TunnelState::Starting.is_terminal());
        assert!(!TunnelState::Polling.is_terminal());
        assert!(TunnelState::Active { url: "https://x.io".into() }.is_terminal());
        assert!(TunnelState::Failed { error: "boom".into() }.is_terminal());
    }

    #[test]
    fn test_scrub_credential() {
        let scrubbed = scrub_credential("authtoken sekret-123 rejected", "sekret-123");
        assert_eq!(
            scrubbed,
            format!("authtoken {} rejected", CREDENTIAL_PLACEHOLDER)
        );

        // 空凭据不做替换
        assert_eq!(scrub_credential("anything", ""), "anything");
    }
}
