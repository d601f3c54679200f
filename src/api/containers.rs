//! 容器清单 API
//!
//! 包含 /containers/* 端点

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::domain::container::ContainersResponse;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 创建容器清单路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/containers", get(list_containers))
        .route("/containers/watch", get(watch_containers))
}

/// 列出发布了公开端口的容器
///
/// GET /containers
/// 需要 API Key
async fn list_containers(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let containers = state.inventory.list_exposable().await.map_err(|e| {
        error!(error = %e, "Failed to list containers");
        ApiError::service_unavailable(format!("Failed to list containers: {}", e))
    })?;

    let total = containers.len();
    Ok(Json(ContainersResponse { containers, total }))
}

/// 以 SSE 推送容器清单
///
/// GET /containers/watch
/// 需要 API Key
///
/// 连接建立时先推一次当前清单，此后每次容器 start/destroy 事件触发重新
/// 拉取并推送。事件可能合并或重复，推送的始终是完整清单而非增量。
async fn watch_containers(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.inventory.subscribe();

    let stream = async_stream::stream! {
        yield snapshot_event(&state).await;

        loop {
            match rx.recv().await {
                Ok(_) => yield snapshot_event(&state).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "Container event subscriber lagged");
                    // 落后也只是意味着要重新拉一次全量
                    yield snapshot_event(&state).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// 拉取当前清单并编码为一个 SSE 事件
async fn snapshot_event(state: &Arc<AppState>) -> Result<Event, Infallible> {
    match state.inventory.list_exposable().await {
        Ok(containers) => {
            let total = containers.len();
            let body = serde_json::to_string(&ContainersResponse { containers, total })
                .unwrap_or_default();
            Ok(Event::default().event("containers").data(body))
        }
        Err(e) => {
            error!(error = %e, "Failed to refresh container list");
            Ok(Event::default()
                .event("error")
                .data(format!("Failed to list containers: {}", e)))
        }
    }
}
