//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{JRD_JSON, build_webfinger_document, parse_acct_resource};
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/host-meta
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/host-meta", get(host_meta))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for local accounts.
///
/// Query: ?resource=acct:user@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let (username, domain) = parse_acct_resource(&query.resource)
        .ok_or_else(|| AppError::Validation("Invalid acct resource".to_string()))?;

    if !domain.eq_ignore_ascii_case(&state.config.server.domain) {
        return Err(AppError::NotFound);
    }

    let user = state.account_service().get_by_username(username).await?;
    let document = build_webfinger_document(
        &user.username,
        &state.config.server.domain,
        &state.config.server.base_url(),
    );

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/.well-known/webfinger", "200"])
        .inc();

    Ok(([(CONTENT_TYPE, JRD_JSON)], Json(document)).into_response())
}

/// GET /.well-known/host-meta
///
/// Returns host-meta XML for WebFinger discovery.
async fn host_meta(State(state): State<AppState>) -> impl IntoResponse {
    let base_url = state.config.server.base_url();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        base_url
    );

    ([(CONTENT_TYPE, "application/xrd+xml")], xml)
}
