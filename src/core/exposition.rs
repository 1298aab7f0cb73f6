//! HTTP endpoint serving the gauges in the prometheus text format.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::metrics::AcceleratorMetrics;
use crate::error::Result;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build the router serving `metrics_path`.
pub fn create_app(metrics: Arc<AcceleratorMetrics>, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<AcceleratorMetrics>>) -> Response {
    match metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            text,
        )
            .into_response(),
        Err(e) => {
            log::warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Bind `addr` and serve until `shutdown` fires.
///
/// Binding happens before this returns so a taken port is reported to the
/// caller; the serving itself runs on the returned task.
pub async fn spawn_listener(
    addr: SocketAddr,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    log::info!("Serving metrics on {}", local_addr);

    let handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;

        if let Err(e) = result {
            log::error!("Metrics listener failed: {}", e);
        }
        log::debug!("Metrics listener stopped");
    });

    Ok((local_addr, handle))
}
