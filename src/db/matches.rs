//! Match, participant, round and audit persistence

use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use super::diesel_schema::{match_audit, match_participants, match_rounds, matches};
use super::models::{
    current_timestamp, CreditStatus, MatchAudit, MatchParticipant, MatchRecord, MatchRound,
    MatchStatus, NewMatch, NewMatchAudit, Team,
};
use crate::error::LedgerError;

/// Query parameters for listing matches
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchQuery {
    pub store_id: Option<String>,
    pub status: Option<MatchStatus>,
    pub credit_status: Option<CreditStatus>,
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

pub fn get_match(conn: &mut SqliteConnection, id: &str) -> Result<Option<MatchRecord>, LedgerError> {
    Ok(matches::table
        .filter(matches::id.eq(id))
        .first(conn)
        .optional()?)
}

pub fn require_match(conn: &mut SqliteConnection, id: &str) -> Result<MatchRecord, LedgerError> {
    get_match(conn, id)?.ok_or_else(|| LedgerError::NotFound(format!("Match {}", id)))
}

/// List matches, newest first
pub fn list_matches(conn: &mut SqliteConnection, query: &MatchQuery) -> Result<Vec<MatchRecord>, LedgerError> {
    let mut base_query = matches::table.into_boxed();

    if let Some(ref store_id) = query.store_id {
        base_query = base_query.filter(matches::store_id.eq(store_id));
    }

    if let Some(status) = query.status {
        base_query = base_query.filter(matches::status.eq(status.as_str()));
    }

    if let Some(credit_status) = query.credit_status {
        base_query = base_query.filter(matches::credit_status.eq(credit_status.as_str()));
    }

    Ok(base_query
        .order(matches::created_at.desc())
        .limit(query.limit)
        .offset(query.offset)
        .load(conn)?)
}

pub fn list_participants(conn: &mut SqliteConnection, match_id: &str) -> Result<Vec<MatchParticipant>, LedgerError> {
    Ok(match_participants::table
        .filter(match_participants::match_id.eq(match_id))
        .order((match_participants::team.asc(), match_participants::account_id.asc()))
        .load(conn)?)
}

pub fn list_rounds(conn: &mut SqliteConnection, match_id: &str) -> Result<Vec<MatchRound>, LedgerError> {
    Ok(match_rounds::table
        .filter(match_rounds::match_id.eq(match_id))
        .order(match_rounds::round_index.asc())
        .load(conn)?)
}

pub fn list_audit(conn: &mut SqliteConnection, match_id: &str) -> Result<Vec<MatchAudit>, LedgerError> {
    Ok(match_audit::table
        .filter(match_audit::match_id.eq(match_id))
        .order(match_audit::created_at.asc())
        .load(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert a completed match with its participants and rounds. Callers run
/// this inside one transaction so the three writes land together.
pub fn insert_completed_match(
    conn: &mut SqliteConnection,
    record: &NewMatch<'_>,
    participants: &[MatchParticipant],
    rounds: &[MatchRound],
) -> Result<MatchRecord, LedgerError> {
    diesel::insert_into(matches::table)
        .values(record)
        .execute(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => LedgerError::Conflict(format!("Match {} already exists", record.id)),
            other => LedgerError::Database(other),
        })?;

    diesel::insert_into(match_participants::table)
        .values(participants)
        .execute(conn)?;

    diesel::insert_into(match_rounds::table)
        .values(rounds)
        .execute(conn)?;

    require_match(conn, record.id)
}

/// Replace every round of a match
pub fn replace_rounds(conn: &mut SqliteConnection, match_id: &str, rounds: &[MatchRound]) -> Result<(), LedgerError> {
    diesel::delete(match_rounds::table.filter(match_rounds::match_id.eq(match_id))).execute(conn)?;
    diesel::insert_into(match_rounds::table)
        .values(rounds)
        .execute(conn)?;
    Ok(())
}

/// Store recomputed totals and winner
pub fn update_outcome(
    conn: &mut SqliteConnection,
    match_id: &str,
    red_total: i64,
    yellow_total: i64,
    winner: Option<Team>,
) -> Result<(), LedgerError> {
    diesel::update(matches::table.filter(matches::id.eq(match_id)))
        .set((
            matches::red_total.eq(red_total),
            matches::yellow_total.eq(yellow_total),
            matches::winner.eq(winner.map(|w| w.as_str())),
            matches::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn update_participant_result(
    conn: &mut SqliteConnection,
    match_id: &str,
    account_id: &str,
    result: &str,
    award: i64,
) -> Result<(), LedgerError> {
    diesel::update(
        match_participants::table
            .filter(match_participants::match_id.eq(match_id))
            .filter(match_participants::account_id.eq(account_id)),
    )
    .set((
        match_participants::result.eq(result),
        match_participants::award.eq(award),
    ))
    .execute(conn)?;
    Ok(())
}

pub fn set_credit_status(conn: &mut SqliteConnection, match_id: &str, status: CreditStatus) -> Result<(), LedgerError> {
    diesel::update(matches::table.filter(matches::id.eq(match_id)))
        .set((
            matches::credit_status.eq(status.as_str()),
            matches::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Soft delete; returns false if the match was already deleted
pub fn mark_deleted(conn: &mut SqliteConnection, match_id: &str) -> Result<bool, LedgerError> {
    let now = current_timestamp();
    let updated = diesel::update(
        matches::table
            .filter(matches::id.eq(match_id))
            .filter(matches::status.ne(MatchStatus::Deleted.as_str())),
    )
    .set((
        matches::status.eq(MatchStatus::Deleted.as_str()),
        matches::deleted_at.eq(Some(now.as_str())),
        matches::updated_at.eq(now.as_str()),
    ))
    .execute(conn)?;
    Ok(updated > 0)
}

pub fn record_audit(
    conn: &mut SqliteConnection,
    match_id: &str,
    action: &str,
    actor: Option<&str>,
    detail: &serde_json::Value,
) -> Result<MatchAudit, LedgerError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();
    let detail_json = serde_json::to_string(detail)?;

    diesel::insert_into(match_audit::table)
        .values(&NewMatchAudit {
            id: &id,
            match_id,
            action,
            actor,
            detail_json: &detail_json,
            created_at: &now,
        })
        .execute(conn)?;

    Ok(match_audit::table
        .filter(match_audit::id.eq(&id))
        .first(conn)?)
}
