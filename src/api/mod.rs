//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (for federation)
//! - WebFinger discovery
//! - Public timelines
//! - Metrics (Prometheus)

mod activitypub;
pub mod metrics;
mod timelines;
mod wellknown;

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};

use crate::federation::ACTIVITY_JSON;

/// Largest accepted request body (inbox deliveries)
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub use activitypub::activitypub_router;
pub use metrics::metrics_router;
pub use timelines::timelines_router;
pub use wellknown::wellknown_router;

/// JSON body served as `application/activity+json`
pub(crate) fn activity_json(document: serde_json::Value) -> Response {
    ([(CONTENT_TYPE, ACTIVITY_JSON)], Json(document)).into_response()
}
