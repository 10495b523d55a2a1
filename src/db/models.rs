//! Diesel model definitions and domain vocabulary
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//! - Text enums: the closed vocabularies stored in TEXT columns

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;
use crate::error::LedgerError;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Current UTC timestamp as RFC 3339 with microseconds, so ledger rows
/// written within the same second still sort in write order
pub fn current_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

// ============================================================================
// Text Enums
// ============================================================================

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(LedgerError::Validation(format!(
                        "Invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// Account roles supplied by the identity provider
    Role {
        Participant => "participant",
        Caregiver => "caregiver",
        Operator => "operator",
        Administrator => "administrator",
    }
}

text_enum! {
    Team {
        Red => "red",
        Yellow => "yellow",
    }
}

text_enum! {
    /// Individual outcome of a settled match
    MatchResult {
        Win => "win",
        Draw => "draw",
        Loss => "loss",
    }
}

text_enum! {
    MatchStatus {
        InProgress => "in_progress",
        Completed => "completed",
        Deleted => "deleted",
    }
}

text_enum! {
    /// Progress of the per-participant credit phase
    CreditStatus {
        Pending => "pending",
        Credited => "credited",
        Partial => "partial",
    }
}

text_enum! {
    TransactionKind {
        Earned => "earned",
        EarnedCorrection => "earned_correction",
        LocalGrant => "local_grant",
        Spent => "spent",
    }
}

impl MatchResult {
    /// Result for a member of `team` given the match winner (None = draw)
    pub fn for_team(team: Team, winner: Option<Team>) -> Self {
        match winner {
            None => MatchResult::Draw,
            Some(w) if w == team => MatchResult::Win,
            Some(_) => MatchResult::Loss,
        }
    }
}

impl Role {
    /// Roles allowed to grant and redeem points
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Operator | Role::Administrator)
    }
}

// ============================================================================
// Account Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Account {
    pub id: String,
    pub role: String,
    pub store_id: Option<String>,
    pub display_name: Option<String>,
    /// Legacy single caregiver -> participant link, kept in sync from
    /// `caregiver_links`
    pub linked_participant_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    pub fn role(&self) -> Result<Role, LedgerError> {
        self.role.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = accounts)]
pub struct NewAccount<'a> {
    pub id: &'a str,
    pub role: &'a str,
    pub store_id: Option<&'a str>,
    pub display_name: Option<&'a str>,
    pub linked_participant_id: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = caregiver_links)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CaregiverLink {
    pub caregiver_id: String,
    pub participant_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = caregiver_links)]
pub struct NewCaregiverLink<'a> {
    pub caregiver_id: &'a str,
    pub participant_id: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Wallet & Ledger Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = wallets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Wallet {
    pub account_id: String,
    pub honor_balance: i64,
    pub local_balance: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = wallets)]
pub struct NewWallet<'a> {
    pub account_id: &'a str,
    pub honor_balance: i64,
    pub local_balance: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Immutable ledger row; `honor_delta`/`local_delta` are the per-currency
/// effects and `amount` the headline figure shown to people
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = point_transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PointTransaction {
    pub id: String,
    pub account_id: String,
    pub kind: String,
    pub amount: i64,
    pub honor_delta: i64,
    pub local_delta: i64,
    pub description: String,
    pub match_id: Option<String>,
    pub operator_id: Option<String>,
    pub store_id: Option<String>,
    pub created_at: String,
    /// Write order across the whole ledger
    pub seq: i64,
}

impl PointTransaction {
    pub fn kind(&self) -> Result<TransactionKind, LedgerError> {
        self.kind.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = point_transactions)]
pub struct NewPointTransaction<'a> {
    pub id: &'a str,
    pub account_id: &'a str,
    pub kind: &'a str,
    pub amount: i64,
    pub honor_delta: i64,
    pub local_delta: i64,
    pub description: &'a str,
    pub match_id: Option<&'a str>,
    pub operator_id: Option<&'a str>,
    pub store_id: Option<&'a str>,
    pub created_at: &'a str,
    pub seq: i64,
}

// ============================================================================
// Match Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = matches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MatchRecord {
    pub id: String,
    pub store_id: String,
    pub status: String,
    pub winner: Option<String>,
    pub red_total: i64,
    pub yellow_total: i64,
    pub credit_status: String,
    pub recorded_by: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl MatchRecord {
    pub fn status(&self) -> Result<MatchStatus, LedgerError> {
        self.status.parse()
    }

    pub fn winner(&self) -> Result<Option<Team>, LedgerError> {
        self.winner.as_deref().map(str::parse::<Team>).transpose()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = matches)]
pub struct NewMatch<'a> {
    pub id: &'a str,
    pub store_id: &'a str,
    pub status: &'a str,
    pub winner: Option<&'a str>,
    pub red_total: i64,
    pub yellow_total: i64,
    pub credit_status: &'a str,
    pub recorded_by: Option<&'a str>,
    pub created_at: &'a str,
    pub completed_at: Option<&'a str>,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = match_participants)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MatchParticipant {
    pub match_id: String,
    pub account_id: String,
    pub team: String,
    pub result: String,
    pub award: i64,
}

impl MatchParticipant {
    pub fn team(&self) -> Result<Team, LedgerError> {
        self.team.parse()
    }

    pub fn result(&self) -> Result<MatchResult, LedgerError> {
        self.result.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = match_rounds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MatchRound {
    pub match_id: String,
    pub round_index: i32,
    pub red_score: i32,
    pub yellow_score: i32,
    pub evidence_ref: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = match_audit)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MatchAudit {
    pub id: String,
    pub match_id: String,
    pub action: String,
    pub actor: Option<String>,
    pub detail_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = match_audit)]
pub struct NewMatchAudit<'a> {
    pub id: &'a str,
    pub match_id: &'a str,
    pub action: &'a str,
    pub actor: Option<&'a str>,
    pub detail_json: &'a str,
    pub created_at: &'a str,
}

/// Audit action names
pub mod audit_actions {
    pub const SETTLED: &str = "settled";
    pub const EDITED: &str = "edited";
    pub const DELETED: &str = "deleted";
    pub const RECREDITED: &str = "recredited";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trip() {
        for kind in [
            TransactionKind::Earned,
            TransactionKind::EarnedCorrection,
            TransactionKind::LocalGrant,
            TransactionKind::Spent,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert_eq!(MatchStatus::InProgress.as_str(), "in_progress");
        assert_eq!(
            serde_json::to_string(&TransactionKind::LocalGrant).unwrap(),
            "\"local_grant\""
        );
    }

    #[test]
    fn test_unknown_text_is_validation_error() {
        let err = "purple".parse::<Team>().unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_result_for_team() {
        assert_eq!(MatchResult::for_team(Team::Red, Some(Team::Red)), MatchResult::Win);
        assert_eq!(MatchResult::for_team(Team::Yellow, Some(Team::Red)), MatchResult::Loss);
        assert_eq!(MatchResult::for_team(Team::Yellow, None), MatchResult::Draw);
    }
}
