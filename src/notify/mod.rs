//! Push-notification channel and asynchronous dispatch
//!
//! The channel itself is an external service: the core only hands it
//! `(recipient, title, message, metadata)` and assumes no delivery
//! guarantee. Dispatch is decoupled from request handling through
//! [`DispatchQueue`], which retries each recipient independently.

pub mod channel;
pub mod queue;

use serde::{Deserialize, Serialize};

pub use channel::{LogChannel, NotificationChannel, WebhookChannel};
pub use queue::{deliver_with_retry, DispatchQueue, RetryPolicy};

/// One message for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
