//! Liveness/readiness endpoints for the daemon mode.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bidscout_storage::Store;

pub async fn serve(store: Arc<Store>, port: u16, shutdown: CancellationToken) {
    let router = Router::new()
        .route("/health", get(|| async { "healthy" }))
        .route("/ready", get(ready))
        .with_state(store);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port, error = %err, "failed to bind health server");
            return;
        }
    };
    info!(port, "health server listening");

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        error!(error = %err, "health server error");
    }
}

async fn ready(State(store): State<Arc<Store>>) -> (StatusCode, &'static str) {
    match tokio::time::timeout(Duration::from_secs(5), store.ping()).await {
        Ok(Ok(())) => (StatusCode::OK, "ready"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "database unavailable"),
    }
}
