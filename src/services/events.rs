//! Event system for ledger operations
//!
//! Provides an event bus for notifying listeners about point movements and
//! match lifecycle changes. Useful for:
//! - Audit logging
//! - Surfacing isolated post-commit failures to operators
//! - Metrics or cache invalidation in embedding services

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::db::Team;

/// Ledger events emitted by services
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    // Match events
    MatchSettled {
        match_id: String,
        store_id: String,
        winner: Option<Team>,
        participants: usize,
    },
    MatchEdited {
        match_id: String,
        red_total: i64,
        yellow_total: i64,
        winner: Option<Team>,
    },
    MatchDeleted {
        match_id: String,
    },

    // Point events
    PointsCredited {
        account_id: String,
        match_id: String,
        award: i64,
    },
    CreditSkipped {
        account_id: String,
        match_id: String,
    },
    CreditFailed {
        account_id: String,
        match_id: String,
        error: String,
    },
    PointsCorrected {
        account_id: String,
        match_id: String,
        delta: i64,
    },
    PointsGranted {
        account_id: String,
        operator_id: String,
        amount: i64,
        local_balance: i64,
    },
    PointsRedeemed {
        account_id: String,
        operator_id: String,
        amount: i64,
        local_balance: i64,
    },

    // Account events
    AccountCreated {
        id: String,
        role: String,
    },
    CaregiverLinked {
        caregiver_id: String,
        participant_id: String,
    },
    CaregiverUnlinked {
        caregiver_id: String,
        participant_id: String,
    },

    // Notification events
    NotificationQueued {
        recipient_id: String,
        subject_id: String,
    },
    NotificationRejected {
        recipient_id: String,
        reason: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::MatchSettled { match_id, store_id, winner, participants } => {
                debug!(
                    match_id = %match_id,
                    store_id = %store_id,
                    winner = ?winner,
                    participants = participants,
                    "Match settled"
                );
            }
            LedgerEvent::PointsCredited { account_id, match_id, award } => {
                debug!(account_id = %account_id, match_id = %match_id, award = award, "Points credited");
            }
            LedgerEvent::CreditFailed { account_id, match_id, error } => {
                warn!(account_id = %account_id, match_id = %match_id, error = %error, "Credit failed");
            }
            LedgerEvent::PointsGranted { account_id, operator_id, amount, .. } => {
                debug!(account_id = %account_id, operator_id = %operator_id, amount = amount, "Points granted");
            }
            LedgerEvent::NotificationRejected { recipient_id, reason } => {
                warn!(recipient_id = %recipient_id, reason = %reason, "Notification rejected");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
