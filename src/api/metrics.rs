//! Prometheus metrics endpoint

use axum::{
    Router,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// GET /metrics
///
/// All registered instruments in Prometheus text format.
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(text) => (StatusCode::OK, [(CONTENT_TYPE, encoder.format_type())], text).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Create metrics router
///
/// Stateless, so it is merged after the application state is attached.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}
