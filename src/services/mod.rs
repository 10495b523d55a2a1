//! Service layer for carematch-ledger
//!
//! Services hold the business rules between callers and repositories.
//! Each service wraps database operations with:
//! - Input validation and permission checks
//! - Transaction boundaries
//! - Event emission for audit logging
//!
//! ## Architecture
//!
//! ```text
//! Callers (CLI, embedding services)
//!     ↓
//! Service Layer (settlement, grants, accounts)
//!     ↓
//! WalletStore (the only balance writer)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod accounts;
pub mod events;
pub mod fanout;
pub mod grants;
pub mod settlement;
pub mod wallet_store;

// Re-exports
pub use accounts::AccountService;
pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent};
pub use fanout::NotificationFanout;
pub use grants::{GrantReceipt, GrantRequest, GrantService, RedeemRequest};
pub use settlement::{
    CreditState, EditOutcome, MatchDetail, MatchTotals, ParticipantFailure, ParticipantResult, RecreditSummary,
    RoundInput, SettleRequest, SettlementEngine, SettlementOutcome,
};
pub use wallet_store::{Balance, CreditOutcome, Posting, ReconciliationReport, WalletStore};

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::LedgerDb;
use crate::notify::{DispatchQueue, NotificationChannel, RetryPolicy};

/// Service container for dependency injection
///
/// Holds all services over one shared database. The wallet store is handed
/// to the settlement engine and the grant service only.
pub struct Services {
    pub accounts: Arc<AccountService>,
    pub wallets: Arc<WalletStore>,
    pub settlement: Arc<SettlementEngine>,
    pub grants: Arc<GrantService>,
    pub fanout: Arc<NotificationFanout>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services and start the notification dispatcher.
    ///
    /// The returned handle finishes after every `Services` (and so every
    /// queue producer) is dropped and pending deliveries complete.
    pub fn new(
        db: Arc<LedgerDb>,
        config: &Config,
        channel: Arc<dyn NotificationChannel>,
    ) -> (Self, JoinHandle<()>) {
        let events = Arc::new(EventBus::new());
        let (queue, dispatcher) = DispatchQueue::start(
            channel,
            config.notifications.queue_capacity,
            RetryPolicy::from(&config.notifications),
        );

        let wallets = Arc::new(WalletStore::new(db.clone()));
        let fanout = Arc::new(NotificationFanout::new(db.clone(), queue, events.clone()));

        let services = Self {
            accounts: Arc::new(AccountService::new(db.clone(), events.clone())),
            settlement: Arc::new(SettlementEngine::new(
                db,
                wallets.clone(),
                fanout.clone(),
                events.clone(),
                config.points.clone(),
            )),
            grants: Arc::new(GrantService::new(wallets.clone(), events.clone(), config.points.clone())),
            wallets,
            fanout,
            events,
        };

        (services, dispatcher)
    }
}
