//! Built-in handlers served by the `zerodown` binary.

use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;
use tokio::sync::watch;

use crate::http::request::RequestId;
use crate::lifecycle::{LifecycleState, StartupMode};
use crate::net::ConnectionTracker;

/// What the handlers report about the running process.
#[derive(Clone)]
pub struct AppState {
    pub mode: StartupMode,
    pub lifecycle: watch::Receiver<LifecycleState>,
    pub connections: ConnectionTracker,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub pid: u32,
    pub mode: StartupMode,
    pub state: LifecycleState,
    pub active_connections: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .with_state(state)
}

async fn index(State(state): State<AppState>, Extension(id): Extension<RequestId>) -> String {
    tracing::debug!(request_id = %id.as_str(), "Serving index");
    format!(
        "hello from pid {} ({} start)\n",
        std::process::id(),
        state.mode
    )
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport {
        pid: std::process::id(),
        mode: state.mode,
        state: *state.lifecycle.borrow(),
        active_connections: state.connections.active_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::http::request::RequestIdLayer;

    #[tokio::test]
    async fn status_reports_lifecycle() {
        let (tx, rx) = watch::channel(LifecycleState::Running);
        let app = router(AppState {
            mode: StartupMode::Inherited,
            lifecycle: rx,
            connections: ConnectionTracker::new(),
        });

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["mode"], "inherited");
        assert_eq!(report["state"], "running");
        assert_eq!(report["active_connections"], 0);

        tx.send_replace(LifecycleState::Terminated);
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["state"], "terminated");
    }

    #[tokio::test]
    async fn index_names_the_startup_mode() {
        let (_tx, rx) = watch::channel(LifecycleState::Running);
        let app = router(AppState {
            mode: StartupMode::Fresh,
            lifecycle: rx,
            connections: ConnectionTracker::new(),
        })
        .layer(RequestIdLayer);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("(fresh start)"));
    }
}
