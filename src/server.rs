//! The health and metrics HTTP surface, served on a port separate
//! from any reconciler traffic.

use crate::metrics::REGISTRY;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared readiness state: not ready until the first reconcile dispatches.
pub struct ServerState {
    pub ready: bool,
}

/// The `/healthz`/`/readyz` router. Metrics are deliberately not mounted
/// here: spec.md §6 puts them on a separate HTTP port.
pub fn build_health_router(state: Arc<Mutex<ServerState>>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { (StatusCode::OK, "ok") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
        // permissive: this surface carries no secrets and is commonly
        // scraped from a dashboard on a different origin than the cluster.
        .layer(CorsLayer::permissive())
}

/// The `/metrics` router, served on its own port per spec.md §6.
pub fn build_metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
}

/// Serve the health surface (`/healthz`, `/readyz`) on `health_addr` and the
/// metrics surface (`/metrics`) on `metrics_addr`, both honoring the same
/// shutdown signal, until either listener exits.
pub async fn serve(
    state: Arc<Mutex<ServerState>>,
    mut shutdown: broadcast::Receiver<()>,
    health_addr: SocketAddr,
    metrics_addr: SocketAddr,
) -> anyhow::Result<()> {
    let health_app = build_health_router(state);
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    info!(addr = %health_addr, "health_server_started");

    let metrics_app = build_metrics_router();
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    info!(addr = %metrics_addr, "metrics_server_started");

    let mut health_shutdown = shutdown.resubscribe();
    let health_task = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
        let _ = health_shutdown.recv().await;
    });

    let metrics_task = axum::serve(metrics_listener, metrics_app).with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    });

    tokio::try_join!(health_task, metrics_task)?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<ServerState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&families, &mut buffer).and_then(|_| {
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }) {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(ready: bool) -> Arc<Mutex<ServerState>> {
        Arc::new(Mutex::new(ServerState { ready }))
    }

    #[tokio::test]
    async fn healthz_always_returns_ok() {
        let app = build_health_router(state(false));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_returns_503_before_ready() {
        let app = build_health_router(state(false));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_returns_200_once_ready() {
        let app = build_health_router(state(true));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_router_does_not_mount_metrics() {
        let app = build_health_router(state(false));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let app = build_metrics_router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
