//! Account directory and caregiver linking
//!
//! Two linking models coexist: the `caregiver_links` join table and the
//! legacy `accounts.linked_participant_id` field. The join table is
//! authoritative; every link write rewrites the legacy field from it.
//! Reads (interested-party resolution) take the union of both.

use std::collections::BTreeSet;

use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use super::diesel_schema::{accounts, caregiver_links};
use super::models::{current_timestamp, Account, CaregiverLink, NewAccount, NewCaregiverLink, Role};
use crate::error::LedgerError;

// ============================================================================
// Query Types
// ============================================================================

/// Input for creating an account
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountInput {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl CreateAccountInput {
    pub fn new(id: impl Into<String>, role: Role, store_id: Option<&str>) -> Self {
        Self {
            id: Some(id.into()),
            role,
            store_id: store_id.map(str::to_string),
            display_name: None,
        }
    }

    pub fn participant(id: impl Into<String>, store_id: &str) -> Self {
        Self::new(id, Role::Participant, Some(store_id))
    }
}

/// Query parameters for listing accounts
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountQuery {
    pub role: Option<Role>,
    pub store_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get account by ID
pub fn get_account(conn: &mut SqliteConnection, id: &str) -> Result<Option<Account>, LedgerError> {
    Ok(accounts::table
        .filter(accounts::id.eq(id))
        .first(conn)
        .optional()?)
}

/// Get account by ID, `NotFound` when missing
pub fn require_account(conn: &mut SqliteConnection, id: &str) -> Result<Account, LedgerError> {
    get_account(conn, id)?.ok_or_else(|| LedgerError::NotFound(format!("Account {}", id)))
}

/// Get accounts by ID, in no particular order
pub fn get_accounts(conn: &mut SqliteConnection, ids: &[String]) -> Result<Vec<Account>, LedgerError> {
    Ok(accounts::table
        .filter(accounts::id.eq_any(ids))
        .load(conn)?)
}

/// List accounts with filtering
pub fn list_accounts(conn: &mut SqliteConnection, query: &AccountQuery) -> Result<Vec<Account>, LedgerError> {
    let mut base_query = accounts::table.into_boxed();

    if let Some(role) = query.role {
        base_query = base_query.filter(accounts::role.eq(role.as_str()));
    }

    if let Some(ref store_id) = query.store_id {
        base_query = base_query.filter(accounts::store_id.eq(store_id));
    }

    Ok(base_query
        .order(accounts::id.asc())
        .limit(query.limit)
        .offset(query.offset)
        .load(conn)?)
}

/// Links recorded in the join table for a caregiver
pub fn links_for_caregiver(
    conn: &mut SqliteConnection,
    caregiver_id: &str,
) -> Result<Vec<CaregiverLink>, LedgerError> {
    Ok(caregiver_links::table
        .filter(caregiver_links::caregiver_id.eq(caregiver_id))
        .order((caregiver_links::created_at.asc(), caregiver_links::participant_id.asc()))
        .load(conn)?)
}

/// Caregivers interested in a participant: join-table links plus legacy
/// single links, de-duplicated and sorted
pub fn interested_parties(
    conn: &mut SqliteConnection,
    participant_id: &str,
) -> Result<Vec<String>, LedgerError> {
    let linked: Vec<String> = caregiver_links::table
        .filter(caregiver_links::participant_id.eq(participant_id))
        .select(caregiver_links::caregiver_id)
        .load(conn)?;

    let legacy: Vec<String> = accounts::table
        .filter(accounts::linked_participant_id.eq(participant_id))
        .select(accounts::id)
        .load(conn)?;

    let recipients: BTreeSet<String> = linked.into_iter().chain(legacy).collect();
    Ok(recipients.into_iter().collect())
}

// ============================================================================
// Write Operations
// ============================================================================

/// Create an account
pub fn create_account(conn: &mut SqliteConnection, input: CreateAccountInput) -> Result<Account, LedgerError> {
    let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    if id.trim().is_empty() {
        return Err(LedgerError::Validation("Account id must not be empty".into()));
    }

    if get_account(conn, &id)?.is_some() {
        return Err(LedgerError::Conflict(format!("Account {} already exists", id)));
    }

    let now = current_timestamp();
    let new_account = NewAccount {
        id: &id,
        role: input.role.as_str(),
        store_id: input.store_id.as_deref(),
        display_name: input.display_name.as_deref(),
        linked_participant_id: None,
        created_at: &now,
        updated_at: &now,
    };

    diesel::insert_into(accounts::table)
        .values(&new_account)
        .execute(conn)?;

    require_account(conn, &id)
}

/// Link a caregiver to a participant; linking twice is a no-op
pub fn link_caregiver(
    conn: &mut SqliteConnection,
    caregiver_id: &str,
    participant_id: &str,
) -> Result<CaregiverLink, LedgerError> {
    let caregiver = require_account(conn, caregiver_id)?;
    let participant = require_account(conn, participant_id)?;

    if caregiver.role()? != Role::Caregiver {
        return Err(LedgerError::Validation(format!(
            "Account {} is not a caregiver",
            caregiver_id
        )));
    }
    if participant.role()? != Role::Participant {
        return Err(LedgerError::Validation(format!(
            "Account {} is not a participant",
            participant_id
        )));
    }

    let now = current_timestamp();
    diesel::insert_or_ignore_into(caregiver_links::table)
        .values(&NewCaregiverLink {
            caregiver_id,
            participant_id,
            created_at: &now,
        })
        .execute(conn)?;

    sync_legacy_link(conn, caregiver_id)?;

    Ok(caregiver_links::table
        .filter(caregiver_links::caregiver_id.eq(caregiver_id))
        .filter(caregiver_links::participant_id.eq(participant_id))
        .first(conn)?)
}

/// Remove a link; returns false when no such link existed
pub fn unlink_caregiver(
    conn: &mut SqliteConnection,
    caregiver_id: &str,
    participant_id: &str,
) -> Result<bool, LedgerError> {
    let removed = diesel::delete(
        caregiver_links::table
            .filter(caregiver_links::caregiver_id.eq(caregiver_id))
            .filter(caregiver_links::participant_id.eq(participant_id)),
    )
    .execute(conn)?;

    sync_legacy_link(conn, caregiver_id)?;
    Ok(removed > 0)
}

/// Rewrite the legacy single-link field from the join table: the oldest
/// remaining link, or null when none remain
pub fn sync_legacy_link(conn: &mut SqliteConnection, caregiver_id: &str) -> Result<Option<String>, LedgerError> {
    let primary = links_for_caregiver(conn, caregiver_id)?
        .into_iter()
        .next()
        .map(|link| link.participant_id);

    diesel::update(accounts::table.filter(accounts::id.eq(caregiver_id)))
        .set((
            accounts::linked_participant_id.eq(primary.as_deref()),
            accounts::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    Ok(primary)
}

/// Copy legacy single links that have no join-table row into the join
/// table. Returns the number of links created.
pub fn backfill_legacy_links(conn: &mut SqliteConnection) -> Result<usize, LedgerError> {
    let legacy: Vec<(String, String)> = accounts::table
        .filter(accounts::linked_participant_id.is_not_null())
        .select((accounts::id, accounts::linked_participant_id.assume_not_null()))
        .load(conn)?;

    let now = current_timestamp();
    let mut created = 0;
    for (caregiver_id, participant_id) in legacy {
        if get_account(conn, &participant_id)?.is_none() {
            continue;
        }
        created += diesel::insert_or_ignore_into(caregiver_links::table)
            .values(&NewCaregiverLink {
                caregiver_id: &caregiver_id,
                participant_id: &participant_id,
                created_at: &now,
            })
            .execute(conn)?;
    }

    Ok(created)
}

/// Write the legacy field directly, as pre-migration clients still do
pub fn set_legacy_link(
    conn: &mut SqliteConnection,
    caregiver_id: &str,
    participant_id: Option<&str>,
) -> Result<(), LedgerError> {
    let updated = diesel::update(accounts::table.filter(accounts::id.eq(caregiver_id)))
        .set((
            accounts::linked_participant_id.eq(participant_id),
            accounts::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    if updated == 0 {
        return Err(LedgerError::NotFound(format!("Account {}", caregiver_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    fn seed(conn: &mut SqliteConnection) {
        create_account(conn, CreateAccountInput::participant("p-1", "store-a")).unwrap();
        create_account(conn, CreateAccountInput::participant("p-2", "store-a")).unwrap();
        create_account(conn, CreateAccountInput::new("c-1", Role::Caregiver, None)).unwrap();
        create_account(conn, CreateAccountInput::new("c-2", Role::Caregiver, None)).unwrap();
    }

    #[test]
    fn test_duplicate_account_conflicts() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed(conn);
            let err = create_account(conn, CreateAccountInput::participant("p-1", "store-b")).unwrap_err();
            assert!(matches!(err, LedgerError::Conflict(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_link_updates_legacy_field() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed(conn);
            link_caregiver(conn, "c-1", "p-1")?;
            link_caregiver(conn, "c-1", "p-2")?;

            let caregiver = require_account(conn, "c-1")?;
            assert_eq!(caregiver.linked_participant_id.as_deref(), Some("p-1"));

            assert!(unlink_caregiver(conn, "c-1", "p-1")?);
            let caregiver = require_account(conn, "c-1")?;
            assert_eq!(caregiver.linked_participant_id.as_deref(), Some("p-2"));

            assert!(unlink_caregiver(conn, "c-1", "p-2")?);
            assert!(!unlink_caregiver(conn, "c-1", "p-2")?);
            let caregiver = require_account(conn, "c-1")?;
            assert_eq!(caregiver.linked_participant_id, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_link_rejects_wrong_roles() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed(conn);
            let err = link_caregiver(conn, "p-2", "p-1").unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
            let err = link_caregiver(conn, "c-1", "missing").unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_interested_parties_unions_both_models() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed(conn);
            link_caregiver(conn, "c-1", "p-1")?;
            // c-1 is in both models for p-1 and must appear once
            set_legacy_link(conn, "c-2", Some("p-1"))?;

            assert_eq!(interested_parties(conn, "p-1")?, vec!["c-1", "c-2"]);
            assert!(interested_parties(conn, "p-2")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_backfill_legacy_links() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed(conn);
            set_legacy_link(conn, "c-2", Some("p-2"))?;
            assert_eq!(backfill_legacy_links(conn)?, 1);
            assert_eq!(backfill_legacy_links(conn)?, 0);
            let links = links_for_caregiver(conn, "c-2")?;
            assert!(links.iter().any(|l| l.participant_id == "p-2"));
            Ok(())
        })
        .unwrap();
    }
}
