//! Wallet balance operations
//!
//! `adjust_balances` is the only balance write. It is a single conditional
//! UPDATE, so the non-negative check and the increment cannot be separated
//! by a concurrent writer.

use diesel::prelude::*;

use super::diesel_schema::wallets;
use super::models::{current_timestamp, NewWallet, Wallet};
use crate::error::LedgerError;

/// Get wallet by account ID
pub fn get_wallet(conn: &mut SqliteConnection, account_id: &str) -> Result<Option<Wallet>, LedgerError> {
    Ok(wallets::table
        .filter(wallets::account_id.eq(account_id))
        .first(conn)
        .optional()?)
}

/// Get the wallet, creating an empty one on first use
pub fn get_or_create_wallet(conn: &mut SqliteConnection, account_id: &str) -> Result<Wallet, LedgerError> {
    if let Some(wallet) = get_wallet(conn, account_id)? {
        return Ok(wallet);
    }

    let now = current_timestamp();
    diesel::insert_or_ignore_into(wallets::table)
        .values(&NewWallet {
            account_id,
            honor_balance: 0,
            local_balance: 0,
            created_at: &now,
            updated_at: &now,
        })
        .execute(conn)?;

    get_wallet(conn, account_id)?
        .ok_or_else(|| LedgerError::Internal(format!("Wallet for {} vanished after create", account_id)))
}

/// Apply signed deltas to both balances atomically.
///
/// Fails with `InsufficientFunds` and changes nothing when either balance
/// would drop below zero.
pub fn adjust_balances(
    conn: &mut SqliteConnection,
    account_id: &str,
    honor_delta: i64,
    local_delta: i64,
) -> Result<Wallet, LedgerError> {
    get_or_create_wallet(conn, account_id)?;

    let updated = diesel::update(
        wallets::table
            .filter(wallets::account_id.eq(account_id))
            .filter((wallets::honor_balance + honor_delta).ge(0_i64))
            .filter((wallets::local_balance + local_delta).ge(0_i64)),
    )
    .set((
        wallets::honor_balance.eq(wallets::honor_balance + honor_delta),
        wallets::local_balance.eq(wallets::local_balance + local_delta),
        wallets::updated_at.eq(current_timestamp()),
    ))
    .execute(conn)?;

    let wallet = get_wallet(conn, account_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("Wallet {}", account_id)))?;

    if updated == 0 {
        return Err(LedgerError::InsufficientFunds {
            account_id: account_id.to_string(),
            honor_balance: wallet.honor_balance,
            local_balance: wallet.local_balance,
            honor_delta,
            local_delta,
        });
    }

    Ok(wallet)
}

/// List wallets ordered by account
pub fn list_wallets(conn: &mut SqliteConnection, limit: i64, offset: i64) -> Result<Vec<Wallet>, LedgerError> {
    Ok(wallets::table
        .order(wallets::account_id.asc())
        .limit(limit)
        .offset(offset)
        .load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::accounts::{create_account, CreateAccountInput};
    use crate::db::LedgerDb;

    fn db_with_participant() -> LedgerDb {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| create_account(conn, CreateAccountInput::participant("p-1", "store-a")))
            .unwrap();
        db
    }

    #[test]
    fn test_get_or_create_is_lazy_and_stable() {
        let db = db_with_participant();
        db.with_conn(|conn| {
            assert!(get_wallet(conn, "p-1")?.is_none());
            let first = get_or_create_wallet(conn, "p-1")?;
            let second = get_or_create_wallet(conn, "p-1")?;
            assert_eq!(first, second);
            assert_eq!(first.honor_balance, 0);
            assert_eq!(first.local_balance, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_adjust_moves_both_currencies() {
        let db = db_with_participant();
        db.with_conn(|conn| {
            let wallet = adjust_balances(conn, "p-1", 100, 100)?;
            assert_eq!((wallet.honor_balance, wallet.local_balance), (100, 100));

            let wallet = adjust_balances(conn, "p-1", 0, -40)?;
            assert_eq!((wallet.honor_balance, wallet.local_balance), (100, 60));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_adjust_never_goes_negative() {
        let db = db_with_participant();
        db.with_conn(|conn| {
            adjust_balances(conn, "p-1", 10, 10)?;

            let err = adjust_balances(conn, "p-1", 5, -11).unwrap_err();
            match err {
                LedgerError::InsufficientFunds { local_balance, local_delta, .. } => {
                    assert_eq!(local_balance, 10);
                    assert_eq!(local_delta, -11);
                }
                other => panic!("unexpected error: {other}"),
            }

            // The honor increment in the failed call was not applied either
            let wallet = get_wallet(conn, "p-1")?.unwrap();
            assert_eq!((wallet.honor_balance, wallet.local_balance), (10, 10));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_adjust_unknown_account_fails() {
        let db = LedgerDb::open_in_memory().unwrap();
        let result = db.with_conn(|conn| adjust_balances(conn, "ghost", 1, 1));
        assert!(result.is_err());
    }
}
