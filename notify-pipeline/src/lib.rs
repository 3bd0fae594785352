//! notify-pipeline library crate.
//!
//! Asynchronous notification pipeline with batched SQLite persistence,
//! real-time fan-out and TTL expiry, plus the HTTP surface around it.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod notification;

pub use error::{Error, Result};
