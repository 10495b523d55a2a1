//! Point transaction ledger
//!
//! Append-only. Rows are never updated or deleted; corrections are new rows.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::diesel_schema::point_transactions;
use super::models::{current_timestamp, NewPointTransaction, PointTransaction, TransactionKind};
use crate::error::LedgerError;

// ============================================================================
// Query Types
// ============================================================================

/// A ledger row to append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub honor_delta: i64,
    pub local_delta: i64,
    pub description: String,
    pub match_id: Option<String>,
    pub operator_id: Option<String>,
    pub store_id: Option<String>,
}

impl LedgerEntry {
    /// Settlement award, credited to both currencies
    pub fn earned(account_id: &str, match_id: &str, award: i64, description: String) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind: TransactionKind::Earned,
            amount: award,
            honor_delta: award,
            local_delta: award,
            description,
            match_id: Some(match_id.to_string()),
            operator_id: None,
            store_id: None,
        }
    }

    /// Difference between a recomputed award and the previous one
    pub fn earned_correction(account_id: &str, match_id: &str, delta: i64, description: String) -> Self {
        Self {
            kind: TransactionKind::EarnedCorrection,
            ..Self::earned(account_id, match_id, delta, description)
        }
    }

    /// Operator grant, local currency only
    pub fn local_grant(account_id: &str, amount: i64, reason: &str, operator_id: &str, store_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind: TransactionKind::LocalGrant,
            amount,
            honor_delta: 0,
            local_delta: amount,
            description: reason.to_string(),
            match_id: None,
            operator_id: Some(operator_id.to_string()),
            store_id: Some(store_id.to_string()),
        }
    }

    /// Redemption of local points
    pub fn spent(account_id: &str, amount: i64, description: &str, operator_id: &str, store_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind: TransactionKind::Spent,
            amount: -amount,
            honor_delta: 0,
            local_delta: -amount,
            description: description.to_string(),
            match_id: None,
            operator_id: Some(operator_id.to_string()),
            store_id: Some(store_id.to_string()),
        }
    }

    pub fn with_store(mut self, store_id: &str) -> Self {
        self.store_id = Some(store_id.to_string());
        self
    }
}

/// Query parameters for transaction history
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQuery {
    pub kind: Option<TransactionKind>,
    pub match_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl TransactionQuery {
    pub fn recent(limit: i64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

/// Per-currency ledger totals for one wallet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSums {
    pub honor: i64,
    pub local: i64,
    pub entries: i64,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get transaction by ID
pub fn get_transaction(conn: &mut SqliteConnection, id: &str) -> Result<Option<PointTransaction>, LedgerError> {
    Ok(point_transactions::table
        .filter(point_transactions::id.eq(id))
        .first(conn)
        .optional()?)
}

/// Transaction history for a wallet, newest first
pub fn history(
    conn: &mut SqliteConnection,
    account_id: &str,
    query: &TransactionQuery,
) -> Result<Vec<PointTransaction>, LedgerError> {
    let mut base_query = point_transactions::table
        .filter(point_transactions::account_id.eq(account_id))
        .into_boxed();

    if let Some(kind) = query.kind {
        base_query = base_query.filter(point_transactions::kind.eq(kind.as_str()));
    }

    if let Some(ref match_id) = query.match_id {
        base_query = base_query.filter(point_transactions::match_id.eq(match_id));
    }

    Ok(base_query
        .order(point_transactions::seq.desc())
        .limit(query.limit)
        .offset(query.offset)
        .load(conn)?)
}

/// All transactions referencing a match, oldest first
pub fn transactions_for_match(
    conn: &mut SqliteConnection,
    match_id: &str,
) -> Result<Vec<PointTransaction>, LedgerError> {
    Ok(point_transactions::table
        .filter(point_transactions::match_id.eq(match_id))
        .order(point_transactions::seq.asc())
        .load(conn)?)
}

/// The settlement credit for (wallet, match), if one was written
pub fn find_earned(
    conn: &mut SqliteConnection,
    account_id: &str,
    match_id: &str,
) -> Result<Option<PointTransaction>, LedgerError> {
    Ok(point_transactions::table
        .filter(point_transactions::account_id.eq(account_id))
        .filter(point_transactions::match_id.eq(match_id))
        .filter(point_transactions::kind.eq(TransactionKind::Earned.as_str()))
        .first(conn)
        .optional()?)
}

/// Net settlement credit for (wallet, match): the `earned` row plus any
/// corrections. None when the participant was never credited.
pub fn settled_amount(
    conn: &mut SqliteConnection,
    account_id: &str,
    match_id: &str,
) -> Result<Option<i64>, LedgerError> {
    if find_earned(conn, account_id, match_id)?.is_none() {
        return Ok(None);
    }

    let amounts: Vec<i64> = point_transactions::table
        .filter(point_transactions::account_id.eq(account_id))
        .filter(point_transactions::match_id.eq(match_id))
        .filter(point_transactions::kind.eq_any([
            TransactionKind::Earned.as_str(),
            TransactionKind::EarnedCorrection.as_str(),
        ]))
        .select(point_transactions::amount)
        .load(conn)?;

    Ok(Some(amounts.iter().sum()))
}

/// Sum of deltas per currency for a wallet
pub fn sums_for_account(conn: &mut SqliteConnection, account_id: &str) -> Result<LedgerSums, LedgerError> {
    let deltas: Vec<(i64, i64)> = point_transactions::table
        .filter(point_transactions::account_id.eq(account_id))
        .select((point_transactions::honor_delta, point_transactions::local_delta))
        .load(conn)?;

    Ok(deltas.iter().fold(LedgerSums::default(), |acc, (honor, local)| LedgerSums {
        honor: acc.honor + honor,
        local: acc.local + local,
        entries: acc.entries + 1,
    }))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append a ledger row. Callers pair this with `wallets::adjust_balances`
/// in the same transaction.
pub fn append(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<PointTransaction, LedgerError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();
    // Callers hold an immediate transaction, so max + 1 cannot race
    let last_seq: Option<i64> = point_transactions::table
        .select(diesel::dsl::max(point_transactions::seq))
        .first(conn)?;

    let row = NewPointTransaction {
        id: &id,
        account_id: &entry.account_id,
        kind: entry.kind.as_str(),
        amount: entry.amount,
        honor_delta: entry.honor_delta,
        local_delta: entry.local_delta,
        description: &entry.description,
        match_id: entry.match_id.as_deref(),
        operator_id: entry.operator_id.as_deref(),
        store_id: entry.store_id.as_deref(),
        created_at: &now,
        seq: last_seq.unwrap_or(0) + 1,
    };

    diesel::insert_into(point_transactions::table)
        .values(&row)
        .execute(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => LedgerError::Conflict(format!(
                "{} already recorded for {} in match {}",
                entry.kind,
                entry.account_id,
                entry.match_id.as_deref().unwrap_or("-")
            )),
            other => LedgerError::Database(other),
        })?;

    get_transaction(conn, &id)?
        .ok_or_else(|| LedgerError::Internal("Failed to retrieve appended transaction".into()))
}
