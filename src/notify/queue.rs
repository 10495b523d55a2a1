//! Asynchronous notification dispatch
//!
//! Producers hand jobs to a bounded mpsc queue and return immediately. One
//! dispatcher task drains the queue and delivers every job in its own task,
//! retrying with exponential backoff. Jobs that exhaust their attempts, or
//! that the queue refuses, are logged at error level.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::{Notification, NotificationChannel};
use crate::config::NotificationConfig;
use crate::error::LedgerError;

/// Delivery retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), doubling each time
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NotificationConfig::default())
    }
}

impl From<&NotificationConfig> for RetryPolicy {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// Send one notification, retrying per `policy`. Returns the number of
/// attempts used on success, or the last error.
pub async fn deliver_with_retry(
    channel: &dyn NotificationChannel,
    notification: &Notification,
    policy: &RetryPolicy,
) -> Result<u32, LedgerError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match channel.send(notification).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    recipient_id = %notification.recipient_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Notification delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Producer handle for the dispatch queue
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<Notification>,
}

impl DispatchQueue {
    /// Start the dispatcher. The returned handle completes once every
    /// `DispatchQueue` clone is dropped and in-flight deliveries finish.
    pub fn start(
        channel: Arc<dyn NotificationChannel>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_dispatcher(receiver, channel, policy));
        (Self { sender }, handle)
    }

    /// Hand a job to the dispatcher without waiting
    pub fn enqueue(&self, notification: Notification) -> Result<(), LedgerError> {
        self.sender.try_send(notification).map_err(|e| {
            let (reason, notification) = match e {
                mpsc::error::TrySendError::Full(n) => ("queue full", n),
                mpsc::error::TrySendError::Closed(n) => ("dispatcher stopped", n),
            };
            error!(
                recipient_id = %notification.recipient_id,
                title = %notification.title,
                reason = reason,
                "Notification not queued"
            );
            LedgerError::Notification(format!(
                "Notification for {} not queued: {}",
                notification.recipient_id, reason
            ))
        })
    }
}

async fn run_dispatcher(
    mut receiver: mpsc::Receiver<Notification>,
    channel: Arc<dyn NotificationChannel>,
    policy: RetryPolicy,
) {
    let policy = Arc::new(policy);
    let mut inflight = JoinSet::new();

    info!("Notification dispatcher started");

    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(notification) => {
                    let channel = Arc::clone(&channel);
                    let policy = Arc::clone(&policy);
                    inflight.spawn(async move {
                        deliver_job(channel.as_ref(), notification, &policy).await;
                    });
                }
                None => break,
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Notification delivery task panicked");
                }
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Notification delivery task panicked");
        }
    }

    info!("Notification dispatcher stopped");
}

async fn deliver_job(channel: &dyn NotificationChannel, notification: Notification, policy: &RetryPolicy) {
    match deliver_with_retry(channel, &notification, policy).await {
        Ok(attempts) => {
            debug!(
                recipient_id = %notification.recipient_id,
                attempts = attempts,
                "Notification delivered"
            );
        }
        Err(e) => {
            error!(
                recipient_id = %notification.recipient_id,
                title = %notification.title,
                attempts = policy.max_attempts,
                error = %e,
                "Notification delivery abandoned"
            );
        }
    }
}
