//! API route modules.

pub mod health;
pub mod notifications;
pub mod notify;
pub mod ws;

use axum::Router;

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(notify::router())
        .nest("/notifications", notifications::router())
        .merge(ws::router())
        .nest("/health", health::router())
        .fallback(unknown_endpoint)
        .with_state(state)
}

async fn unknown_endpoint() -> ApiError {
    ApiError::not_found("API endpoint not found")
}
