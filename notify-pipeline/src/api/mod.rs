//! HTTP API.
//!
//! Routes:
//! - `POST /notify` enqueue an event
//! - `GET /notifications/{user_id}` stored notifications for a user
//! - `GET /ws` live notification stream
//! - `GET /health` pipeline status

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
