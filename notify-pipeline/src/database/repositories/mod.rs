//! Repository layer for database access.

pub mod notification;

pub use notification::*;
