//! Health check route.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::notification::BatchStats;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Events waiting for the assembler.
    pub queue_depth: usize,
    /// Notifications waiting for the next bulk write.
    pub buffered: usize,
    /// Connected WebSocket subscribers.
    pub subscribers: usize,
    pub batches: BatchStats,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.pipeline.stats();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        queue_depth: stats.queue_depth,
        buffered: stats.buffered,
        subscribers: state
            .websocket
            .as_ref()
            .map_or(0, |ws| ws.subscriber_count()),
        batches: stats.batches,
    })
}
