//! Notification channel implementations

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::Notification;
use crate::error::LedgerError;

/// Delivery endpoint for notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), LedgerError>;
}

/// Writes notifications to the log; used when no push gateway is configured
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, notification: &Notification) -> Result<(), LedgerError> {
        info!(
            recipient_id = %notification.recipient_id,
            title = %notification.title,
            message = %notification.message,
            "Notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a push gateway
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, notification: &Notification) -> Result<(), LedgerError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| LedgerError::Notification(format!("Push gateway unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Notification(format!(
                "Push gateway returned {} for {}",
                status, notification.recipient_id
            )));
        }

        Ok(())
    }
}
