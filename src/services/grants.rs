//! Operator-side point movements: local grants and redemptions
//!
//! Both touch only the local balance. Inputs are validated first, then the
//! operator's permission is checked against the store affiliation of the
//! operator and the target, all before anything is written. Permission
//! checks run inside the same immediate transaction as the write.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::events::{EventBus, LedgerEvent};
use super::wallet_store::{require_participant, Posting, WalletStore};
use crate::auth::{require_current, IdentityProvider};
use crate::config::PointsConfig;
use crate::db::{accounts, Account, LedgerEntry, PointTransaction, Role};
use crate::error::LedgerError;

/// Operator-initiated local credit
#[derive(Debug, Clone, Deserialize)]
pub struct GrantRequest {
    pub account_id: String,
    pub local_amount: i64,
    pub reason: String,
    pub store_id: String,
    pub operator_id: String,
}

/// Local points spent at the store counter
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemRequest {
    pub account_id: String,
    pub amount: i64,
    pub description: String,
    pub store_id: String,
    pub operator_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantReceipt {
    /// Local balance after the movement
    pub new_balance: i64,
    pub transaction: PointTransaction,
}

impl From<Posting> for GrantReceipt {
    fn from(posting: Posting) -> Self {
        Self {
            new_balance: posting.wallet.local_balance,
            transaction: posting.transaction,
        }
    }
}

pub struct GrantService {
    wallets: Arc<WalletStore>,
    events: Arc<EventBus>,
    points: PointsConfig,
}

impl GrantService {
    pub fn new(wallets: Arc<WalletStore>, events: Arc<EventBus>, points: PointsConfig) -> Self {
        Self {
            wallets,
            events,
            points,
        }
    }

    /// Credit local points on behalf of an operator
    pub async fn grant(&self, request: GrantRequest) -> Result<GrantReceipt, LedgerError> {
        validate_amount(request.local_amount, &self.points)?;
        let reason = validate_reason(&request.reason, &self.points)?;

        let entry = LedgerEntry::local_grant(
            &request.account_id,
            request.local_amount,
            &reason,
            &request.operator_id,
            &request.store_id,
        );
        let receipt = self.authorized_post(&request.operator_id, &request.store_id, entry).await?;

        info!(
            account_id = %request.account_id,
            operator_id = %request.operator_id,
            store_id = %request.store_id,
            amount = request.local_amount,
            new_balance = receipt.new_balance,
            "Local points granted"
        );
        self.events.emit(LedgerEvent::PointsGranted {
            account_id: request.account_id,
            operator_id: request.operator_id,
            amount: request.local_amount,
            local_balance: receipt.new_balance,
        });
        Ok(receipt)
    }

    /// Grant as the account the identity provider reports, at that
    /// account's store
    pub async fn grant_as_current(
        &self,
        identity: &dyn IdentityProvider,
        account_id: &str,
        local_amount: i64,
        reason: &str,
    ) -> Result<GrantReceipt, LedgerError> {
        let current = require_current(identity)?;
        let store_id = current.store_id.clone().ok_or_else(|| {
            LedgerError::Permission(format!("Operator {} has no store affiliation", current.id))
        })?;

        self.grant(GrantRequest {
            account_id: account_id.to_string(),
            local_amount,
            reason: reason.to_string(),
            store_id,
            operator_id: current.id,
        })
        .await
    }

    /// Spend local points
    pub async fn redeem(&self, request: RedeemRequest) -> Result<GrantReceipt, LedgerError> {
        validate_amount(request.amount, &self.points)?;
        let description = validate_reason(&request.description, &self.points)?;

        let entry = LedgerEntry::spent(
            &request.account_id,
            request.amount,
            &description,
            &request.operator_id,
            &request.store_id,
        );
        let receipt = self.authorized_post(&request.operator_id, &request.store_id, entry).await?;

        info!(
            account_id = %request.account_id,
            operator_id = %request.operator_id,
            amount = request.amount,
            new_balance = receipt.new_balance,
            "Local points redeemed"
        );
        self.events.emit(LedgerEvent::PointsRedeemed {
            account_id: request.account_id,
            operator_id: request.operator_id,
            amount: request.amount,
            local_balance: receipt.new_balance,
        });
        Ok(receipt)
    }

    async fn authorized_post(
        &self,
        operator_id: &str,
        store_id: &str,
        entry: LedgerEntry,
    ) -> Result<GrantReceipt, LedgerError> {
        let (operator_id, store_id) = (operator_id.to_string(), store_id.to_string());
        let result = self
            .wallets
            .adjust_checked(entry, move |conn, entry| {
                authorize(conn, &operator_id, &store_id, &entry.account_id).map(|_| ())
            })
            .await;

        match result {
            Ok(posting) => Ok(posting.into()),
            Err(e) => {
                if matches!(e, LedgerError::Permission(_) | LedgerError::Unauthorized(_)) {
                    warn!(error = %e, "Point movement refused");
                }
                Err(e)
            }
        }
    }
}

/// Check that `operator_id` may move points for `target_id` at `store_id`.
/// Administrators are not bound to a store.
fn authorize(
    conn: &mut SqliteConnection,
    operator_id: &str,
    store_id: &str,
    target_id: &str,
) -> Result<(Account, Account), LedgerError> {
    let operator = accounts::get_account(conn, operator_id)?
        .ok_or_else(|| LedgerError::Unauthorized(format!("Unknown operator {}", operator_id)))?;
    let role = operator.role()?;
    if !role.is_staff() {
        return Err(LedgerError::Permission(format!(
            "Account {} ({}) may not move points",
            operator_id, role
        )));
    }

    let target = require_participant(conn, target_id)?;

    if role == Role::Administrator {
        return Ok((operator, target));
    }

    if operator.store_id.as_deref() != Some(store_id) {
        return Err(LedgerError::Permission(format!(
            "Operator {} is not affiliated with store {}",
            operator_id, store_id
        )));
    }
    if target.store_id != operator.store_id {
        return Err(LedgerError::Permission(format!(
            "Participant {} is not a member of store {}",
            target_id, store_id
        )));
    }

    Ok((operator, target))
}

fn validate_amount(amount: i64, points: &PointsConfig) -> Result<(), LedgerError> {
    if amount < points.min_grant || amount > points.max_grant {
        return Err(LedgerError::Validation(format!(
            "Amount must be between {} and {}, got {}",
            points.min_grant, points.max_grant, amount
        )));
    }
    Ok(())
}

/// Trimmed, non-blank, bounded in characters
fn validate_reason(reason: &str, points: &PointsConfig) -> Result<String, LedgerError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation("Reason must not be blank".into()));
    }
    if trimmed.chars().count() > points.max_reason_len {
        return Err(LedgerError::Validation(format!(
            "Reason must be at most {} characters",
            points.max_reason_len
        )));
    }
    Ok(trimmed.to_string())
}
