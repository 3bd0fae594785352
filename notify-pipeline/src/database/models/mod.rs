//! Database models.

pub mod notification;

pub use notification::NotificationDbModel;
