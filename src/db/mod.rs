//! SQLite ledger database
//!
//! Diesel over an r2d2 pool. Repositories are plain functions taking a
//! `&mut SqliteConnection`, so services decide transaction boundaries.
//!
//! ## Tables
//!
//! - `accounts` / `caregiver_links` - identities and family linking
//! - `wallets` - honor and local balances per participant
//! - `point_transactions` - append-only ledger
//! - `matches` / `match_participants` / `match_rounds` - settled contests
//! - `match_audit` - edit, delete and re-credit trail

pub mod accounts;
pub mod diesel_schema;
pub mod ledger;
pub mod matches;
pub mod models;
pub mod schema;
pub mod wallets;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::LedgerError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Per-connection PRAGMAs
#[derive(Debug)]
struct ConnectionOptions {
    wal: bool,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            BUSY_TIMEOUT_MS
        );
        if self.wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Ledger database handle
pub struct LedgerDb {
    pool: DbPool,
}

impl LedgerDb {
    /// Open or create the ledger database file
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionOptions { wal: true }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every SQLite `:memory:` connection is its own database, so the pool
    /// holds exactly one connection and never recycles it.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory ledger database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionOptions { wal: false }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn, LedgerError> {
        Ok(self.pool.get()?)
    }

    /// Run a read or single-statement operation
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run `f` inside `BEGIN IMMEDIATE`, so the write lock is taken before
    /// any read in the closure
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// `with_conn` on the blocking thread pool
    pub async fn interact<F, T>(self: &Arc<Self>, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.with_conn(f)).await?
    }

    /// `with_transaction` on the blocking thread pool
    pub async fn transact<F, T>(self: &Arc<Self>, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.with_transaction(f)).await?
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LedgerError> {
        use diesel_schema::{accounts, matches, point_transactions, wallets};

        self.with_conn(|conn| {
            let account_count: i64 = accounts::table.count().get_result(conn)?;
            let wallet_count: i64 = wallets::table.count().get_result(conn)?;
            let transaction_count: i64 = point_transactions::table.count().get_result(conn)?;
            let match_count: i64 = matches::table.count().get_result(conn)?;

            Ok(DbStats {
                account_count: account_count as u64,
                wallet_count: wallet_count as u64,
                transaction_count: transaction_count as u64,
                match_count: match_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub account_count: u64,
    pub wallet_count: u64,
    pub transaction_count: u64,
    pub match_count: u64,
}

// Re-exports
pub use accounts::{AccountQuery, CreateAccountInput};
pub use ledger::{LedgerEntry, TransactionQuery};
pub use matches::MatchQuery;
pub use models::*;
