//! CareMatch Ledger - points wallet and match settlement
//!
//! Records contests between two teams of participants, turns each result
//! into point movements and keeps an append-only, reconcilable history of
//! every balance change.
//!
//! ## Currencies
//!
//! | Balance | Changed by | Redeemable |
//! |---------|-----------|------------|
//! | honor   | settlement, settlement corrections | no |
//! | local   | settlement, operator grants, redemptions | yes |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/carematch-ledger/
//! ├── ledger.db          # SQLite (WAL) database
//! └── config.toml        # Configuration
//! ```
//!
//! ## Flow
//!
//! `settle` validates a match, persists it with its rounds in one
//! transaction, credits each participant in an independent idempotent step
//! and queues notifications for linked caregivers.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod services;

pub use auth::{CurrentAccount, IdentityProvider, JwtIdentity, JwtValidator, StaticIdentity};
pub use config::Config;
pub use db::LedgerDb;
pub use error::LedgerError;
pub use notify::{LogChannel, Notification, NotificationChannel, WebhookChannel};
pub use services::Services;
