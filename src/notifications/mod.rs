//! User Notifications
//!
//! - [`model`]: Notification records and actions
//! - [`hub`]: Event conversion, throttling and the bounded store

pub mod hub;
pub mod model;

pub use hub::NotificationHub;
pub use model::{NotificationAction, NotificationKind, WorkflowNotification};
