//! Wallet store
//!
//! Read access is public. Balance mutations are `pub(crate)`: only the
//! settlement engine and the grant service hold the capability to move
//! points, and they receive it as an `Arc<WalletStore>` at construction.
//!
//! Every mutation runs the balance update and the ledger append in one
//! immediate transaction, so a wallet never shows a balance its ledger
//! cannot explain.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{accounts, ledger, wallets};
use crate::db::{Account, LedgerDb, LedgerEntry, PointTransaction, Role, TransactionQuery, Wallet};
use crate::error::LedgerError;

/// A committed balance change and its ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Posting {
    pub wallet: Wallet,
    pub transaction: PointTransaction,
}

/// Result of crediting one participant for one match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited(Posting),
    /// An earlier credit was brought to the award with an `earned_correction`
    Corrected(Posting),
    /// The net credit for this (account, match) already equals the award
    AlreadyCredited(PointTransaction),
}

/// Result of bringing one participant's match credit to a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrueUp {
    Corrected(Posting),
    Settled,
    /// No `earned` row yet; the credit path pays the full award
    NotCredited,
}

/// Current balances of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub honor: i64,
    pub local: i64,
}

/// Stored balances against ledger sums for one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub account_id: String,
    pub honor_balance: i64,
    pub local_balance: i64,
    pub ledger_honor: i64,
    pub ledger_local: i64,
    pub entries: i64,
    pub consistent: bool,
}

// ============================================================================
// Connection-level helpers (caller owns the transaction)
// ============================================================================

/// The account must exist and be a participant to own a wallet
pub(crate) fn require_participant(conn: &mut SqliteConnection, account_id: &str) -> Result<Account, LedgerError> {
    let account = accounts::require_account(conn, account_id)?;
    if account.role()? != Role::Participant {
        return Err(LedgerError::Validation(format!(
            "Account {} is not a participant",
            account_id
        )));
    }
    Ok(account)
}

/// Apply an entry's deltas and append it to the ledger
pub(crate) fn post_entry(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<Posting, LedgerError> {
    let wallet = wallets::adjust_balances(conn, &entry.account_id, entry.honor_delta, entry.local_delta)?;
    let transaction = ledger::append(conn, entry)?;
    Ok(Posting { wallet, transaction })
}

/// Bring the net credit (`earned` plus corrections) for (account, match)
/// to `target`
pub(crate) fn true_up_credit(
    conn: &mut SqliteConnection,
    account_id: &str,
    match_id: &str,
    target: i64,
    store_id: Option<&str>,
) -> Result<TrueUp, LedgerError> {
    let current = match ledger::settled_amount(conn, account_id, match_id)? {
        None => return Ok(TrueUp::NotCredited),
        Some(current) if current == target => return Ok(TrueUp::Settled),
        Some(current) => current,
    };

    let mut entry = LedgerEntry::earned_correction(
        account_id,
        match_id,
        target - current,
        format!("Correction for edited match {}", match_id),
    );
    entry.store_id = store_id.map(str::to_string);
    post_entry(conn, &entry).map(TrueUp::Corrected)
}

/// Post a settlement credit for (account, match), or correct an earlier one
/// whose net amount differs from the entry's award
pub(crate) fn post_match_credit(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<CreditOutcome, LedgerError> {
    let match_id = entry
        .match_id
        .as_deref()
        .ok_or_else(|| LedgerError::Internal("Match credit without match id".into()))?;

    match true_up_credit(conn, &entry.account_id, match_id, entry.amount, entry.store_id.as_deref())? {
        TrueUp::NotCredited => post_entry(conn, entry).map(CreditOutcome::Credited),
        TrueUp::Corrected(posting) => Ok(CreditOutcome::Corrected(posting)),
        TrueUp::Settled => ledger::find_earned(conn, &entry.account_id, match_id)?
            .map(CreditOutcome::AlreadyCredited)
            .ok_or_else(|| LedgerError::Internal("Settled credit without earned row".into())),
    }
}

pub(crate) fn reconcile_wallet(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> Result<ReconciliationReport, LedgerError> {
    let (honor_balance, local_balance) = wallets::get_wallet(conn, account_id)?
        .map(|w| (w.honor_balance, w.local_balance))
        .unwrap_or((0, 0));
    let sums = ledger::sums_for_account(conn, account_id)?;

    Ok(ReconciliationReport {
        account_id: account_id.to_string(),
        honor_balance,
        local_balance,
        ledger_honor: sums.honor,
        ledger_local: sums.local,
        entries: sums.entries,
        consistent: honor_balance == sums.honor && local_balance == sums.local,
    })
}

// ============================================================================
// Service
// ============================================================================

/// Wallet store
pub struct WalletStore {
    db: Arc<LedgerDb>,
}

impl WalletStore {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Get the participant's wallet, creating an empty one on first use
    pub async fn get_or_create(&self, account_id: &str) -> Result<Wallet, LedgerError> {
        let id = account_id.to_string();
        self.db
            .transact(move |conn| {
                require_participant(conn, &id)?;
                wallets::get_or_create_wallet(conn, &id)
            })
            .await
    }

    /// Current balances; zero for a participant who has no wallet yet
    pub async fn balance(&self, account_id: &str) -> Result<Balance, LedgerError> {
        let id = account_id.to_string();
        self.db
            .interact(move |conn| {
                require_participant(conn, &id)?;
                Ok(wallets::get_wallet(conn, &id)?
                    .map(|w| Balance {
                        honor: w.honor_balance,
                        local: w.local_balance,
                    })
                    .unwrap_or(Balance { honor: 0, local: 0 }))
            })
            .await
    }

    /// Transaction history, newest first
    pub async fn history(
        &self,
        account_id: &str,
        query: TransactionQuery,
    ) -> Result<Vec<PointTransaction>, LedgerError> {
        debug!(account_id = %account_id, limit = query.limit, "Loading wallet history");
        let id = account_id.to_string();
        self.db
            .interact(move |conn| {
                accounts::require_account(conn, &id)?;
                ledger::history(conn, &id, &query)
            })
            .await
    }

    /// Compare stored balances with the ledger sums
    pub async fn reconcile(&self, account_id: &str) -> Result<ReconciliationReport, LedgerError> {
        let id = account_id.to_string();
        let report = self
            .db
            .transact(move |conn| {
                accounts::require_account(conn, &id)?;
                reconcile_wallet(conn, &id)
            })
            .await?;

        if !report.consistent {
            warn!(
                account_id = %report.account_id,
                honor_balance = report.honor_balance,
                ledger_honor = report.ledger_honor,
                local_balance = report.local_balance,
                ledger_local = report.ledger_local,
                "Wallet does not reconcile with ledger"
            );
        }
        Ok(report)
    }

    /// Reconcile every wallet
    pub async fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>, LedgerError> {
        const PAGE: i64 = 500;

        self.db
            .transact(move |conn| {
                let mut reports = Vec::new();
                let mut offset = 0;
                loop {
                    let page = wallets::list_wallets(conn, PAGE, offset)?;
                    if page.is_empty() {
                        break;
                    }
                    offset += page.len() as i64;
                    for wallet in page {
                        reports.push(reconcile_wallet(conn, &wallet.account_id)?);
                    }
                }
                Ok(reports)
            })
            .await
    }

    /// Apply a ledger entry to its wallet
    pub(crate) async fn adjust(&self, entry: LedgerEntry) -> Result<Posting, LedgerError> {
        self.adjust_checked(entry, |conn, entry| {
            require_participant(conn, &entry.account_id).map(|_| ())
        })
        .await
    }

    /// Apply a ledger entry once `check` passes; the check and the write
    /// share one immediate transaction
    pub(crate) async fn adjust_checked<F>(&self, entry: LedgerEntry, check: F) -> Result<Posting, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection, &LedgerEntry) -> Result<(), LedgerError> + Send + 'static,
    {
        let posting = self
            .db
            .transact(move |conn| {
                check(conn, &entry)?;
                post_entry(conn, &entry)
            })
            .await?;

        info!(
            account_id = %posting.wallet.account_id,
            kind = %posting.transaction.kind,
            honor_delta = posting.transaction.honor_delta,
            local_delta = posting.transaction.local_delta,
            "Wallet adjusted"
        );
        Ok(posting)
    }

    /// Bring a participant's net credit for a match to `target` with an
    /// `earned_correction` row. Participants never credited for the match
    /// are left alone; the re-credit path pays them the stored award.
    pub(crate) async fn true_up_match_credit(
        &self,
        account_id: &str,
        match_id: &str,
        target: i64,
        store_id: &str,
    ) -> Result<TrueUp, LedgerError> {
        let (account_id, match_id, store_id) = (account_id.to_string(), match_id.to_string(), store_id.to_string());
        let outcome = self
            .db
            .transact(move |conn| true_up_credit(conn, &account_id, &match_id, target, Some(&store_id)))
            .await?;

        if let TrueUp::Corrected(ref posting) = outcome {
            info!(
                account_id = %posting.wallet.account_id,
                match_id = ?posting.transaction.match_id,
                delta = posting.transaction.amount,
                "Match credit corrected"
            );
        }
        Ok(outcome)
    }

    /// Idempotent settlement credit for one participant. A participant
    /// whose net credit differs from the award gets a correction.
    pub(crate) async fn credit_match(&self, entry: LedgerEntry) -> Result<CreditOutcome, LedgerError> {
        let outcome = self
            .db
            .transact(move |conn| {
                require_participant(conn, &entry.account_id)?;
                post_match_credit(conn, &entry)
            })
            .await?;

        match &outcome {
            CreditOutcome::Credited(posting) => info!(
                account_id = %posting.wallet.account_id,
                match_id = ?posting.transaction.match_id,
                award = posting.transaction.amount,
                "Match credit posted"
            ),
            CreditOutcome::Corrected(posting) => info!(
                account_id = %posting.wallet.account_id,
                match_id = ?posting.transaction.match_id,
                delta = posting.transaction.amount,
                "Match credit corrected"
            ),
            CreditOutcome::AlreadyCredited(existing) => debug!(
                account_id = %existing.account_id,
                match_id = ?existing.match_id,
                "Match credit already posted"
            ),
        }
        Ok(outcome)
    }
}
