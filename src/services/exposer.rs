//! Tunnel exposure controller
//!
//! We launch a tunnel sidecar scoped to one published port, poll its log
//! output on a fixed interval and drive the session state machine
//! (idle -> starting -> polling -> active/failed). One session at a time:
//! a new expose supersedes the previous one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::env::TunnelConfig;
use crate::domain::tunnel::{
    scrub_credential, ExposeRequest, TunnelLogRecord, TunnelState, TunnelStatus,
};
use crate::infra::docker::{ContainerRuntime, TunnelLaunchSpec};

/// 暴露请求无法受理（不会创建会话）
#[derive(Debug)]
pub enum ExposeError {
    /// 端口非法
    InvalidPort,
    /// 端口没有被任何容器发布
    PortNotPublished(u16),
    /// 查询容器列表失败
    Runtime(String),
}

impl fmt::Display for ExposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposeError::InvalidPort => write!(f, "Port must be a positive integer"),
            ExposeError::PortNotPublished(port) => {
                write!(f, "Port {} is not published by any container", port)
            }
            ExposeError::Runtime(msg) => write!(f, "Container runtime unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ExposeError {}

/// 会话句柄：轮询任务与 sidecar 的所有权凭证
struct SessionHandle {
    name: String,
    port: u16,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// 隧道暴露控制器
///
/// 状态通过 watch 通道对外广播，API 层订阅后即可观察每次迁移。
pub struct TunnelExposer {
    runtime: Arc<dyn ContainerRuntime>,
    config: TunnelConfig,
    session: RwLock<Option<SessionHandle>>,
    state_tx: watch::Sender<TunnelState>,
}

impl TunnelExposer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: TunnelConfig) -> Self {
        let (state_tx, _) = watch::channel(TunnelState::Idle);
        Self {
            runtime,
            config,
            session: RwLock::new(None),
            state_tx,
        }
    }

    /// 订阅状态变更
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    /// 当前状态
    pub fn state(&self) -> TunnelState {
        self.state_tx.borrow().clone()
    }

    /// 当前会话快照
    pub async fn status(&self) -> TunnelStatus {
        let state = self.state();
        let session = self.session.read().await;
        TunnelStatus {
            state: state.name().to_string(),
            url: state.url().map(String::from),
            last_error: state.error().map(String::from),
            session_name: session.as_ref().map(|s| s.name.clone()),
            port: session.as_ref().map(|s| s.port),
            started_at: session.as_ref().map(|s| s.started_at),
        }
    }

    /// 发起一次端口暴露
    ///
    /// 前置校验失败返回 Err，不创建会话；sidecar 启动失败体现为 `Failed`
    /// 状态。已有会话会先被取代（取消轮询并移除其 sidecar）。
    pub async fn expose(&self, request: ExposeRequest) -> Result<TunnelStatus, ExposeError> {
        if request.port == 0 {
            return Err(ExposeError::InvalidPort);
        }

        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| ExposeError::Runtime(e.to_string()))?;
        if !containers.iter().any(|c| c.publishes(request.port)) {
            return Err(ExposeError::PortNotPublished(request.port));
        }

        if request.credential.is_empty() {
            warn!(
                port = request.port,
                "Expose requested with empty credential; the tunnel provider will reject the session"
            );
        }

        if self.teardown_session().await {
            info!("Previous tunnel session superseded");
        }

        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}-{}", self.config.name_prefix, request.port, &suffix[..8]);
        info!(port = request.port, session = %name, "Starting tunnel session");
        self.set_state(TunnelState::Starting);

        let spec = TunnelLaunchSpec {
            name: name.clone(),
            port: request.port,
            credential: request.credential.clone(),
            image: self.config.image.clone(),
            credential_env: self.config.credential_env.clone(),
        };

        if let Err(e) = self.runtime.launch_tunnel(&spec).await {
            let error = scrub_credential(&e.to_string(), &request.credential);
            warn!(session = %name, error = %error, "Tunnel launch failed");
            // 启动一半的容器可能残留，尽力清掉
            if let Err(rm) = self.runtime.remove_container(&name).await {
                debug!(session = %name, error = %rm, "Cleanup after failed launch");
            }
            self.set_state(TunnelState::Failed { error });
            return Ok(self.status().await);
        }

        let cancel = CancellationToken::new();
        {
            let mut session = self.session.write().await;
            *session = Some(SessionHandle {
                name: name.clone(),
                port: request.port,
                started_at: Utc::now(),
                cancel: cancel.clone(),
            });
        }
        self.set_state(TunnelState::Polling);

        let runtime = self.runtime.clone();
        let config = self.config.clone();
        let state_tx = self.state_tx.clone();
        let credential = request.credential;
        tokio::spawn(async move {
            poll_until_terminal(runtime, config, name, credential, cancel, state_tx).await;
        });

        Ok(self.status().await)
    }

    /// 显式取消当前会话，状态回到 `Idle`
    pub async fn cancel(&self) -> bool {
        let had_session = self.teardown_session().await;
        if had_session {
            info!("Tunnel session cancelled");
            self.set_state(TunnelState::Idle);
        }
        had_session
    }

    /// 取消当前会话的轮询并移除其 sidecar；返回是否存在会话
    async fn teardown_session(&self) -> bool {
        let handle = self.session.write().await.take();
        let Some(handle) = handle else {
            return false;
        };

        handle.cancel.cancel();
        if let Err(e) = self.runtime.remove_container(&handle.name).await {
            warn!(session = %handle.name, error = %e, "Failed to remove tunnel sidecar");
        }
        true
    }

    fn set_state(&self, state: TunnelState) {
        self.state_tx.send_replace(state);
    }
}

/// 轮询循环：按固定间隔抓取累积日志，直到终态或取消
///
/// 每轮：抓取失败或 stderr 非空即判失败；否则只解析高水位之后的新增完整
/// 行，首个就绪记录携带的 URL 使会话进入 `Active`。
async fn poll_until_terminal(
    runtime: Arc<dyn ContainerRuntime>,
    config: TunnelConfig,
    name: String,
    credential: String,
    cancel: CancellationToken,
    state_tx: watch::Sender<TunnelState>,
) {
    let mut ticker = interval(Duration::from_millis(config.poll_interval_ms));
    let deadline = Instant::now() + Duration::from_secs(config.poll_timeout_secs);
    let mut scanner = LogScanner::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session = %name, "Polling cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        if Instant::now() >= deadline {
            let error = format!(
                "tunnel did not become ready within {}s",
                config.poll_timeout_secs
            );
            warn!(session = %name, "Tunnel poll timed out");
            finish(&runtime, &name, &cancel, &state_tx, TunnelState::Failed { error }, true).await;
            return;
        }

        let logs = match runtime.fetch_logs(&name).await {
            Ok(logs) => logs,
            Err(e) => {
                let error = scrub_credential(&e.to_string(), &credential);
                warn!(session = %name, error = %error, "Tunnel log fetch failed");
                finish(&runtime, &name, &cancel, &state_tx, TunnelState::Failed { error }, true)
                    .await;
                return;
            }
        };

        // 错误通道非空即失败，不再看这次的 stdout
        if !logs.stderr.trim().is_empty() {
            let error = scrub_credential(logs.stderr.trim(), &credential);
            warn!(session = %name, error = %error, "Tunnel process reported an error");
            finish(&runtime, &name, &cancel, &state_tx, TunnelState::Failed { error }, true).await;
            return;
        }

        if let Some(url) = scanner.scan(&logs.stdout) {
            info!(session = %name, url = %url, "Tunnel is active");
            finish(&runtime, &name, &cancel, &state_tx, TunnelState::Active { url }, false).await;
            return;
        }
    }
}

/// 终态收尾：迁移状态、取消本会话的间隔任务，失败路径顺带移除 sidecar
///
/// `Active` 时 sidecar 继续运行，它承载着隧道流量。
async fn finish(
    runtime: &Arc<dyn ContainerRuntime>,
    name: &str,
    cancel: &CancellationToken,
    state_tx: &watch::Sender<TunnelState>,
    state: TunnelState,
    remove_sidecar: bool,
) {
    state_tx.send_replace(state);
    cancel.cancel();
    if remove_sidecar {
        if let Err(e) = runtime.remove_container(name).await {
            debug!(session = %name, error = %e, "Failed to remove tunnel sidecar");
        }
    }
}

/// 累积日志扫描器
///
/// 日志命令每次返回自启动以来的完整输出。已扫描的完整行数作为高水位，
/// 每轮只解析新增部分；末尾没有换行符的残行留给下一轮，累积重取保证它
/// 最终会完整出现。
struct LogScanner {
    scanned: usize,
}

impl LogScanner {
    fn new() -> Self {
        Self { scanned: 0 }
    }

    /// 扫描累积 stdout，返回首个就绪记录中的 URL
    fn scan(&mut self, stdout: &str) -> Option<String> {
        let lines: Vec<&str> = stdout.split('\n').collect();
        // split 的最后一个元素要么是空串（输出以换行收尾），要么是未写完的残行
        let complete = lines.len().saturating_sub(1);

        for (idx, line) in lines[..complete].iter().enumerate().skip(self.scanned) {
            if line.trim().is_empty() {
                continue;
            }
            let Some(record) = TunnelLogRecord::decode(line) else {
                // 坏行跳过，不致命
                continue;
            };
            if record.is_tunnel_started() {
                if let Some(url) = record.url {
                    self.scanned = idx + 1;
                    return Some(url);
                }
            }
        }

        self.scanned = complete;
        None
    }
}
