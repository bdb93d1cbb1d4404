//! Prometheus exposition endpoint shared by every binary.
//!
//! Metric series live in the crates that emit them (module-level statics
//! registered against the default registry); this module only serves the
//! encoded snapshot.

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, TextEncoder};

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        tracing::error!(error = ?e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buf,
    )
        .into_response()
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Binds `0.0.0.0:<port>` and serves `/metrics` until the process exits.
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics endpoint listening");
    axum::serve(listener, router()).await?;
    Ok(())
}

/// Spawns the metrics server as a background task; failures are logged, not
/// propagated, so a port clash cannot take the component down.
pub fn spawn(port: u16) {
    tokio::spawn(async move {
        if let Err(e) = serve(port).await {
            tracing::error!(error = ?e, port, "metrics server terminated");
        }
    });
}
