//! Notification fan-out to a participant's interested parties

use std::sync::Arc;

use tracing::debug;

use super::events::{EventBus, LedgerEvent};
use crate::db::{accounts, LedgerDb};
use crate::error::LedgerError;
use crate::notify::{DispatchQueue, Notification};

pub struct NotificationFanout {
    db: Arc<LedgerDb>,
    queue: DispatchQueue,
    events: Arc<EventBus>,
}

impl NotificationFanout {
    pub fn new(db: Arc<LedgerDb>, queue: DispatchQueue, events: Arc<EventBus>) -> Self {
        Self { db, queue, events }
    }

    /// Queue one notification per caregiver linked to `account_id`.
    ///
    /// Returns how many jobs were queued. An account with no linked
    /// caregivers is a no-op. Only recipient resolution can fail; a job the
    /// queue refuses is logged and skipped.
    pub async fn notify_interested_parties(
        &self,
        account_id: &str,
        title: &str,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<usize, LedgerError> {
        let id = account_id.to_string();
        let recipients = self
            .db
            .interact(move |conn| accounts::interested_parties(conn, &id))
            .await?;

        if recipients.is_empty() {
            debug!(account_id = %account_id, "No interested parties");
            return Ok(0);
        }

        let mut queued = 0;
        for recipient_id in recipients {
            let notification = Notification {
                recipient_id: recipient_id.clone(),
                title: title.to_string(),
                message: message.to_string(),
                metadata: metadata.clone(),
            };

            match self.queue.enqueue(notification) {
                Ok(()) => {
                    queued += 1;
                    self.events.emit(LedgerEvent::NotificationQueued {
                        recipient_id,
                        subject_id: account_id.to_string(),
                    });
                }
                Err(e) => {
                    self.events.emit(LedgerEvent::NotificationRejected {
                        recipient_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(account_id = %account_id, queued = queued, "Notifications queued");
        Ok(queued)
    }
}
