//! Stored notification queries.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::notification::Notification;

pub fn router() -> Router<AppState> {
    Router::new().route("/{user_id}", get(list_for_user))
}

/// Notifications for a user, newest first.
async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<Notification>>> {
    let notifications = state.repository.list_by_user(&user_id).await?;
    if notifications.is_empty() {
        return Err(ApiError::not_found(format!(
            "No notifications found for user {user_id}"
        )));
    }
    Ok(Json(notifications))
}
