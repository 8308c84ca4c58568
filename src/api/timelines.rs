//! Timeline endpoints

use axum::{Router, extract::State, response::Json, routing::get};

use crate::AppState;
use crate::data::Post;
use crate::error::AppError;
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Create timelines router
///
/// Routes:
/// - GET /timelines/local
pub fn timelines_router() -> Router<AppState> {
    Router::new().route("/timelines/local", get(local_timeline))
}

/// GET /api/timelines/local
async fn local_timeline(State(state): State<AppState>) -> Result<Json<Vec<Post>>, AppError> {
    let posts = state.timeline_service().local_timeline().await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/timelines/local", "200"])
        .inc();

    Ok(Json(posts))
}
