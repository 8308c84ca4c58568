//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)
//! - Outbox
//! - Followers/Following collections

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::Response,
    routing::{get, post},
};
use serde_json::json;

use super::activity_json;
use crate::AppState;
use crate::error::AppError;
use crate::federation::{InboundRequest, build_actor_document, build_outbox_collection};
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::service::InboxOutcome;

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:username - Actor profile
/// - POST /users/:username/inbox - Personal inbox
/// - GET /users/:username/outbox - Outbox
/// - GET /users/:username/followers - Followers collection
/// - GET /users/:username/following - Following collection
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:username", get(actor))
        .route("/users/:username/inbox", post(inbox))
        .route("/users/:username/outbox", get(outbox))
        .route("/users/:username/followers", get(followers))
        .route("/users/:username/following", get(following))
}

/// GET /users/:username
///
/// Content-Type: application/activity+json
async fn actor(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = state.account_service().get_by_username(&username).await?;
    let document = build_actor_document(&user, &state.config.server.base_url());

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/users/:username", "200"])
        .inc();

    Ok(activity_json(document))
}

/// POST /users/:username/inbox
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Resolve the recipient
/// 2. Verify HTTP Signature
/// 3. Store and dispatch
///
/// Processed, duplicate and unprocessed activities all answer 202.
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let recipient = state.account_service().get_by_username(&username).await?;

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let request = InboundRequest {
        method: method.as_str(),
        path_and_query,
        headers: &headers,
    };
    let check = state.signature_verifier().verify_inbound(&request, &body).await?;

    let outcome = state
        .inbox_service()
        .process_inbound_activity(&body, &recipient, &check)
        .await?;
    if let InboxOutcome::Unprocessed(error) = &outcome {
        tracing::info!(recipient = %recipient.username, kind = error.kind(), "Inbound activity kept for later");
    }

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/users/:username/inbox", "202"])
        .inc();

    Ok(StatusCode::ACCEPTED)
}

/// GET /users/:username/outbox
///
/// First (only) page of the user's posts as Create activities.
async fn outbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = state.account_service().get_by_username(&username).await?;
    let posts = state
        .db
        .get_user_posts(&user.id, state.config.timeline.local_limit)
        .await?;

    let actor_uri = state.config.server.actor_uri(&user.username);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/users/:username/outbox", "200"])
        .inc();

    Ok(activity_json(build_outbox_collection(&actor_uri, &posts)))
}

/// GET /users/:username/followers
///
/// Accepted followers, as a count only.
async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = state.account_service().get_by_username(&username).await?;
    let actor_uri = state.config.server.actor_uri(&user.username);
    let total = state.follow_service().follower_count(&actor_uri).await?;

    Ok(activity_json(json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "OrderedCollection",
        "id": format!("{}/followers", actor_uri),
        "totalItems": total
    })))
}

/// GET /users/:username/following
///
/// Accepted followees, as a count only.
async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = state.account_service().get_by_username(&username).await?;
    let actor_uri = state.config.server.actor_uri(&user.username);
    let total = state.follow_service().following_count(&user).await?;

    Ok(activity_json(json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "OrderedCollection",
        "id": format!("{}/following", actor_uri),
        "totalItems": total
    })))
}
