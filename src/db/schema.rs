//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, LedgerError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| LedgerError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), LedgerError> {
    diesel::sql_query("DELETE FROM schema_version").execute(conn)?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

fn create_tables(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    conn.batch_execute(ACCOUNTS_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create account tables: {}", e)))?;

    conn.batch_execute(LEDGER_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.batch_execute(MATCHES_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create match tables: {}", e)))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

const ACCOUNTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('participant', 'caregiver', 'operator', 'administrator')),
    store_id TEXT,
    display_name TEXT,
    linked_participant_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS caregiver_links (
    caregiver_id TEXT NOT NULL REFERENCES accounts(id),
    participant_id TEXT NOT NULL REFERENCES accounts(id),
    created_at TEXT NOT NULL,
    PRIMARY KEY (caregiver_id, participant_id)
);
"#;

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    account_id TEXT PRIMARY KEY NOT NULL REFERENCES accounts(id),
    honor_balance INTEGER NOT NULL DEFAULT 0 CHECK (honor_balance >= 0),
    local_balance INTEGER NOT NULL DEFAULT 0 CHECK (local_balance >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS point_transactions (
    id TEXT PRIMARY KEY NOT NULL,
    account_id TEXT NOT NULL REFERENCES wallets(account_id),
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL,
    honor_delta INTEGER NOT NULL,
    local_delta INTEGER NOT NULL,
    description TEXT NOT NULL,
    match_id TEXT,
    operator_id TEXT,
    store_id TEXT,
    created_at TEXT NOT NULL,
    seq INTEGER NOT NULL UNIQUE
);
"#;

const MATCHES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY NOT NULL,
    store_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed', 'deleted')),
    winner TEXT CHECK (winner IS NULL OR winner IN ('red', 'yellow')),
    red_total INTEGER NOT NULL,
    yellow_total INTEGER NOT NULL,
    credit_status TEXT NOT NULL,
    recorded_by TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS match_participants (
    match_id TEXT NOT NULL REFERENCES matches(id),
    account_id TEXT NOT NULL REFERENCES accounts(id),
    team TEXT NOT NULL CHECK (team IN ('red', 'yellow')),
    result TEXT NOT NULL,
    award INTEGER NOT NULL,
    PRIMARY KEY (match_id, account_id)
);

CREATE TABLE IF NOT EXISTS match_rounds (
    match_id TEXT NOT NULL REFERENCES matches(id),
    round_index INTEGER NOT NULL,
    red_score INTEGER NOT NULL CHECK (red_score >= 0),
    yellow_score INTEGER NOT NULL CHECK (yellow_score >= 0),
    evidence_ref TEXT NOT NULL,
    PRIMARY KEY (match_id, round_index)
);

CREATE TABLE IF NOT EXISTS match_audit (
    id TEXT PRIMARY KEY NOT NULL,
    match_id TEXT NOT NULL REFERENCES matches(id),
    action TEXT NOT NULL,
    actor TEXT,
    detail_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_accounts_linked ON accounts(linked_participant_id);
CREATE INDEX IF NOT EXISTS idx_accounts_store ON accounts(store_id);
CREATE INDEX IF NOT EXISTS idx_links_participant ON caregiver_links(participant_id);
CREATE INDEX IF NOT EXISTS idx_tx_account ON point_transactions(account_id, seq);
CREATE INDEX IF NOT EXISTS idx_tx_match ON point_transactions(match_id);
CREATE UNIQUE INDEX IF NOT EXISTS uq_tx_earned_per_match
    ON point_transactions(account_id, match_id) WHERE kind = 'earned';
CREATE INDEX IF NOT EXISTS idx_matches_store ON matches(store_id, status);
CREATE INDEX IF NOT EXISTS idx_participants_account ON match_participants(account_id);
CREATE INDEX IF NOT EXISTS idx_audit_match ON match_audit(match_id);
"#;
