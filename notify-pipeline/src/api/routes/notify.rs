//! Event submission.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::notification::Event;

pub fn router() -> Router<AppState> {
    Router::new().route("/notify", post(submit_event))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub message: Option<String>,
    pub post_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub status: &'static str,
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("Missing required field: {field}")))
}

impl TryFrom<NotifyRequest> for Event {
    type Error = ApiError;

    fn try_from(request: NotifyRequest) -> ApiResult<Self> {
        let mut event = Event::new(
            required(request.event_type, "type")?,
            required(request.user_id, "userId")?,
        )
        .with_message(required(request.message, "message")?);
        if let Some(post_id) = request.post_id.filter(|p| !p.trim().is_empty()) {
            event = event.with_post(post_id);
        }
        Ok(event)
    }
}

/// Accept an event for asynchronous processing.
///
/// Answers as soon as the event is queued; persistence happens later.
async fn submit_event(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> ApiResult<Json<NotifyResponse>> {
    let event = Event::try_from(request)?;
    state.pipeline.enqueue(event)?;

    Ok(Json(NotifyResponse {
        status: "Notification event received",
    }))
}
