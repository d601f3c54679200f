//! 隧道暴露 API
//!
//! 包含 /tunnel/* 端点

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};

use crate::domain::tunnel::ExposeRequest;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::services::exposer::ExposeError;
use crate::state::AppState;

/// 创建隧道管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tunnel/expose", post(expose_tunnel))
        .route("/tunnel/status", get(get_tunnel_status))
        .route("/tunnel/cancel", post(cancel_tunnel))
        .route("/tunnel/watch", get(watch_tunnel))
}

/// 发起端口暴露
///
/// POST /tunnel/expose
/// 需要 API Key
///
/// 前置校验失败返回 400；sidecar 启动失败会以 `state = "failed"` 的快照
/// 返回，调用方通过状态观察结果。
async fn expose_tunnel(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExposeRequest>,
) -> ApiResult<impl IntoResponse> {
    let status = state.exposer.expose(request).await.map_err(|e| match e {
        ExposeError::InvalidPort | ExposeError::PortNotPublished(_) => {
            ApiError::bad_request(e.to_string())
        }
        ExposeError::Runtime(msg) => ApiError::service_unavailable(msg),
    })?;

    Ok(Json(status))
}

/// 获取隧道状态
///
/// GET /tunnel/status
/// 需要 API Key
async fn get_tunnel_status(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.exposer.status().await)
}

/// 取消响应
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// 取消当前隧道会话
///
/// POST /tunnel/cancel
/// 需要 API Key
async fn cancel_tunnel(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let cancelled = state.exposer.cancel().await;
    Json(CancelResponse { cancelled })
}

/// 以 SSE 推送隧道状态变更
///
/// GET /tunnel/watch
/// 需要 API Key
async fn watch_tunnel(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.exposer.subscribe();

    let stream = async_stream::stream! {
        yield status_event(&state).await;

        while rx.changed().await.is_ok() {
            yield status_event(&state).await;
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// 当前状态快照编码为一个 SSE 事件
async fn status_event(state: &Arc<AppState>) -> Result<Event, Infallible> {
    let status = state.exposer.status().await;
    let body = serde_json::to_string(&status).unwrap_or_default();
    Ok(Event::default().event("tunnel").data(body))
}
