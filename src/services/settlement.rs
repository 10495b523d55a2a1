//! Match settlement engine
//!
//! `settle` runs in three phases:
//!
//! 1. Validate the submission and compute totals, winner and awards.
//! 2. Persist the match, its participants and its rounds in one database
//!    transaction. Nothing is persisted when validation fails.
//! 3. Credit every participant independently and in parallel. Each credit
//!    is idempotent per (account, match); one participant failing does not
//!    affect the others and does not fail the settlement. Notifications to
//!    interested parties are queued last.
//!
//! Re-credit, round edits and soft deletes operate on settled matches and
//! leave an audit row each.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::{EventBus, LedgerEvent};
use super::fanout::NotificationFanout;
use super::wallet_store::{CreditOutcome, TrueUp, WalletStore};
use crate::config::PointsConfig;
use crate::db::models::audit_actions;
use crate::db::{accounts, ledger, matches};
use crate::db::{
    current_timestamp, CreditStatus, LedgerDb, LedgerEntry, MatchAudit, MatchParticipant, MatchQuery, MatchRecord,
    MatchResult, MatchRound, MatchStatus, NewMatch, PointTransaction, Role, Team,
};
use crate::error::LedgerError;

// ============================================================================
// Request / Response Types
// ============================================================================

/// One scoring unit as submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundInput {
    pub red_score: i32,
    pub yellow_score: i32,
    #[serde(default)]
    pub evidence_ref: Option<String>,
}

impl RoundInput {
    pub fn new(red_score: i32, yellow_score: i32, evidence_ref: &str) -> Self {
        Self {
            red_score,
            yellow_score,
            evidence_ref: Some(evidence_ref.to_string()),
        }
    }
}

/// A recorded match to settle
#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    /// Client-chosen id; resubmitting the same id is a `Conflict`
    #[serde(default)]
    pub match_id: Option<String>,
    pub store_id: String,
    pub rounds: Vec<RoundInput>,
    pub red_team: Vec<String>,
    pub yellow_team: Vec<String>,
    #[serde(default)]
    pub recorded_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchTotals {
    pub red: i64,
    pub yellow: i64,
    /// None for a draw
    pub winner: Option<Team>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditState {
    Credited,
    /// An earlier credit was corrected to the stored award
    Corrected,
    AlreadyCredited,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantResult {
    pub account_id: String,
    pub team: Team,
    pub result: MatchResult,
    pub award: i64,
    pub credit: CreditState,
}

/// A participant whose credit did not commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantFailure {
    pub account_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementOutcome {
    pub match_id: String,
    pub winner: Option<Team>,
    pub red_total: i64,
    pub yellow_total: i64,
    pub credit_status: CreditStatus,
    pub results: Vec<ParticipantResult>,
    pub failures: Vec<ParticipantFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecreditSummary {
    pub match_id: String,
    pub credited: Vec<String>,
    pub corrected: Vec<String>,
    pub already_credited: Vec<String>,
    pub failures: Vec<ParticipantFailure>,
    pub credit_status: CreditStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub match_id: String,
    pub previous: MatchTotals,
    pub current: MatchTotals,
    pub corrections: Vec<PointTransaction>,
    pub failures: Vec<ParticipantFailure>,
    /// `partial` while any participant's net credit differs from the award
    pub credit_status: CreditStatus,
}

/// A match with everything recorded against it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDetail {
    pub record: MatchRecord,
    pub participants: Vec<MatchParticipant>,
    pub rounds: Vec<MatchRound>,
    pub audit: Vec<MatchAudit>,
    /// Ledger rows that reference the match, in write order
    pub transactions: Vec<PointTransaction>,
}

// ============================================================================
// Pure rules
// ============================================================================

/// Rosters: non-empty, bounded, no duplicates, no account on both teams
pub fn validate_rosters(red: &[String], yellow: &[String], max_team_size: usize) -> Result<(), LedgerError> {
    for (team, roster) in [(Team::Red, red), (Team::Yellow, yellow)] {
        if roster.is_empty() {
            return Err(LedgerError::Validation(format!("The {} team has no members", team)));
        }
        if roster.len() > max_team_size {
            return Err(LedgerError::Validation(format!(
                "The {} team has {} members, at most {} allowed",
                team,
                roster.len(),
                max_team_size
            )));
        }
        let mut seen = HashSet::new();
        for id in roster {
            if id.trim().is_empty() {
                return Err(LedgerError::Validation(format!("The {} team lists a blank account id", team)));
            }
            if !seen.insert(id.as_str()) {
                return Err(LedgerError::Validation(format!(
                    "Account {} is listed twice on the {} team",
                    id, team
                )));
            }
        }
    }

    let red_ids: HashSet<&str> = red.iter().map(String::as_str).collect();
    if let Some(both) = yellow.iter().find(|id| red_ids.contains(id.as_str())) {
        return Err(LedgerError::Validation(format!(
            "Account {} cannot play on both teams",
            both
        )));
    }

    Ok(())
}

/// Rounds: at least one, non-negative scores, evidence on every round
pub fn validate_rounds(rounds: &[RoundInput]) -> Result<(), LedgerError> {
    if rounds.is_empty() {
        return Err(LedgerError::Validation("A match needs at least one round".into()));
    }

    for (index, round) in rounds.iter().enumerate() {
        if round.red_score < 0 || round.yellow_score < 0 {
            return Err(LedgerError::Validation(format!(
                "Round {} has a negative score",
                index + 1
            )));
        }
        let has_evidence = round
            .evidence_ref
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false);
        if !has_evidence {
            return Err(LedgerError::Validation(format!(
                "Round {} has no evidence",
                index + 1
            )));
        }
    }

    Ok(())
}

pub fn compute_totals(rounds: &[RoundInput]) -> MatchTotals {
    let red: i64 = rounds.iter().map(|r| i64::from(r.red_score)).sum();
    let yellow: i64 = rounds.iter().map(|r| i64::from(r.yellow_score)).sum();

    let winner = match red.cmp(&yellow) {
        std::cmp::Ordering::Greater => Some(Team::Red),
        std::cmp::Ordering::Less => Some(Team::Yellow),
        std::cmp::Ordering::Equal => None,
    };

    MatchTotals { red, yellow, winner }
}

pub fn award_for(result: MatchResult, points: &PointsConfig) -> i64 {
    match result {
        MatchResult::Win => points.win_award,
        MatchResult::Draw => points.draw_award,
        MatchResult::Loss => points.loss_award,
    }
}

fn round_rows(match_id: &str, rounds: &[RoundInput]) -> Vec<MatchRound> {
    rounds
        .iter()
        .enumerate()
        .map(|(index, round)| MatchRound {
            match_id: match_id.to_string(),
            round_index: index as i32,
            red_score: round.red_score,
            yellow_score: round.yellow_score,
            evidence_ref: round.evidence_ref.as_deref().unwrap_or_default().trim().to_string(),
        })
        .collect()
}

fn credit_description(result: MatchResult, match_id: &str) -> String {
    match result {
        MatchResult::Win => format!("Won match {}", match_id),
        MatchResult::Draw => format!("Drew match {}", match_id),
        MatchResult::Loss => format!("Played match {}", match_id),
    }
}

fn result_notice(name: &str, result: MatchResult, match_id: &str, award: i64) -> (String, String) {
    let (title, verb) = match result {
        MatchResult::Win => ("Match won", "won"),
        MatchResult::Draw => ("Match drawn", "drew"),
        MatchResult::Loss => ("Match played", "played"),
    };
    (
        title.to_string(),
        format!("{} {} match {} and earned {} points.", name, verb, match_id, award),
    )
}

// ============================================================================
// Engine
// ============================================================================

/// Outcome of one credit phase
struct CreditTally {
    states: HashMap<String, CreditState>,
    credited: Vec<String>,
    corrected: Vec<String>,
    already_credited: Vec<String>,
    failures: Vec<ParticipantFailure>,
}

impl CreditTally {
    fn status(&self) -> CreditStatus {
        if self.failures.is_empty() {
            CreditStatus::Credited
        } else {
            CreditStatus::Partial
        }
    }
}

pub struct SettlementEngine {
    db: Arc<LedgerDb>,
    wallets: Arc<WalletStore>,
    fanout: Arc<NotificationFanout>,
    events: Arc<EventBus>,
    points: PointsConfig,
}

impl SettlementEngine {
    pub fn new(
        db: Arc<LedgerDb>,
        wallets: Arc<WalletStore>,
        fanout: Arc<NotificationFanout>,
        events: Arc<EventBus>,
        points: PointsConfig,
    ) -> Self {
        Self {
            db,
            wallets,
            fanout,
            events,
            points,
        }
    }

    /// Settle a recorded match
    pub async fn settle(&self, request: SettleRequest) -> Result<SettlementOutcome, LedgerError> {
        if request.store_id.trim().is_empty() {
            return Err(LedgerError::Validation("Store id must not be blank".into()));
        }
        validate_rosters(&request.red_team, &request.yellow_team, self.points.max_team_size)?;
        validate_rounds(&request.rounds)?;

        let totals = compute_totals(&request.rounds);
        let match_id = request
            .match_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let participants: Vec<MatchParticipant> = request
            .red_team
            .iter()
            .map(|id| (id, Team::Red))
            .chain(request.yellow_team.iter().map(|id| (id, Team::Yellow)))
            .map(|(id, team)| {
                let result = MatchResult::for_team(team, totals.winner);
                MatchParticipant {
                    match_id: match_id.clone(),
                    account_id: id.clone(),
                    team: team.as_str().to_string(),
                    result: result.as_str().to_string(),
                    award: award_for(result, &self.points),
                }
            })
            .collect();
        let rounds = round_rows(&match_id, &request.rounds);

        let names = {
            let match_id = match_id.clone();
            let store_id = request.store_id.clone();
            let recorded_by = request.recorded_by.clone();
            let participants = participants.clone();
            self.db
                .transact(move |conn| {
                    let ids: Vec<String> = participants.iter().map(|p| p.account_id.clone()).collect();
                    let known = accounts::get_accounts(conn, &ids)?;
                    let mut names = HashMap::new();
                    for id in &ids {
                        let account = known
                            .iter()
                            .find(|a| &a.id == id)
                            .ok_or_else(|| LedgerError::NotFound(format!("Account {}", id)))?;
                        if account.role()? != Role::Participant {
                            return Err(LedgerError::Validation(format!(
                                "Account {} is not a participant",
                                id
                            )));
                        }
                        names.insert(id.clone(), account.display_name.clone().unwrap_or_else(|| id.clone()));
                    }

                    let now = current_timestamp();
                    matches::insert_completed_match(
                        conn,
                        &NewMatch {
                            id: &match_id,
                            store_id: &store_id,
                            status: MatchStatus::Completed.as_str(),
                            winner: totals.winner.map(|w| w.as_str()),
                            red_total: totals.red,
                            yellow_total: totals.yellow,
                            credit_status: CreditStatus::Pending.as_str(),
                            recorded_by: recorded_by.as_deref(),
                            created_at: &now,
                            completed_at: Some(&now),
                            updated_at: &now,
                        },
                        &participants,
                        &rounds,
                    )?;
                    matches::record_audit(
                        conn,
                        &match_id,
                        audit_actions::SETTLED,
                        recorded_by.as_deref(),
                        &json!({
                            "red_total": totals.red,
                            "yellow_total": totals.yellow,
                            "winner": totals.winner,
                            "rounds": rounds.len(),
                        }),
                    )?;
                    Ok(names)
                })
                .await?
        };

        info!(
            match_id = %match_id,
            store_id = %request.store_id,
            red_total = totals.red,
            yellow_total = totals.yellow,
            winner = ?totals.winner,
            participants = participants.len(),
            "Match settled"
        );
        self.events.emit(LedgerEvent::MatchSettled {
            match_id: match_id.clone(),
            store_id: request.store_id.clone(),
            winner: totals.winner,
            participants: participants.len(),
        });

        let tally = self.credit_participants(&match_id, &request.store_id, &participants).await;
        let credit_status = tally.status();
        self.finish_credit_phase(&match_id, credit_status, None).await;

        let mut results = Vec::with_capacity(participants.len());
        for participant in &participants {
            let team = participant.team()?;
            let result = participant.result()?;
            let credit = tally
                .states
                .get(&participant.account_id)
                .copied()
                .unwrap_or(CreditState::Failed);
            results.push(ParticipantResult {
                account_id: participant.account_id.clone(),
                team,
                result,
                award: participant.award,
                credit,
            });
        }

        for result in &results {
            let name = names
                .get(&result.account_id)
                .map(String::as_str)
                .unwrap_or(result.account_id.as_str());
            let (title, message) = result_notice(name, result.result, &match_id, result.award);
            let metadata = json!({
                "kind": "match_result",
                "match_id": match_id,
                "participant_id": result.account_id,
                "result": result.result,
                "award": result.award,
            });
            if let Err(e) = self
                .fanout
                .notify_interested_parties(&result.account_id, &title, &message, metadata)
                .await
            {
                warn!(
                    match_id = %match_id,
                    account_id = %result.account_id,
                    error = %e,
                    "Could not resolve notification recipients"
                );
            }
        }

        Ok(SettlementOutcome {
            match_id,
            winner: totals.winner,
            red_total: totals.red,
            yellow_total: totals.yellow,
            credit_status,
            results,
            failures: tally.failures,
        })
    }

    /// Credit every participant of a completed match who has not been
    /// credited yet, and correct any whose net credit differs from the
    /// stored award
    pub async fn recredit(&self, match_id: &str, actor: Option<&str>) -> Result<RecreditSummary, LedgerError> {
        let id = match_id.to_string();
        let (record, participants) = self
            .db
            .interact(move |conn| {
                let record = matches::require_match(conn, &id)?;
                let participants = matches::list_participants(conn, &id)?;
                Ok((record, participants))
            })
            .await?;

        match record.status()? {
            MatchStatus::Completed => {}
            MatchStatus::Deleted => {
                return Err(LedgerError::Validation(format!("Match {} is deleted", match_id)));
            }
            MatchStatus::InProgress => {
                return Err(LedgerError::Validation(format!("Match {} is not completed", match_id)));
            }
        }

        let tally = self.credit_participants(match_id, &record.store_id, &participants).await;
        let credit_status = tally.status();
        let detail = json!({
            "credited": tally.credited,
            "corrected": tally.corrected,
            "already_credited": tally.already_credited,
            "failed": tally.failures.len(),
        });
        self.finish_credit_phase(match_id, credit_status, Some((actor, detail)))
            .await;

        info!(
            match_id = %match_id,
            credited = tally.credited.len(),
            corrected = tally.corrected.len(),
            already_credited = tally.already_credited.len(),
            failed = tally.failures.len(),
            "Match re-credited"
        );

        Ok(RecreditSummary {
            match_id: match_id.to_string(),
            credited: tally.credited,
            corrected: tally.corrected,
            already_credited: tally.already_credited,
            failures: tally.failures,
            credit_status,
        })
    }

    /// Replace a completed match's rounds and bring every credited
    /// participant's net credit to the recomputed award
    pub async fn edit_rounds(
        &self,
        match_id: &str,
        rounds: Vec<RoundInput>,
        actor: Option<&str>,
    ) -> Result<EditOutcome, LedgerError> {
        validate_rounds(&rounds)?;
        let current = compute_totals(&rounds);

        let (record, previous, targets, awards_changed) = {
            let id = match_id.to_string();
            let actor = actor.map(str::to_string);
            let points = self.points.clone();
            let round_rows = round_rows(match_id, &rounds);
            self.db
                .transact(move |conn| {
                    let record = matches::require_match(conn, &id)?;
                    if record.status()? != MatchStatus::Completed {
                        return Err(LedgerError::Validation(format!(
                            "Only completed matches can be edited, {} is {}",
                            id, record.status
                        )));
                    }
                    let previous = MatchTotals {
                        red: record.red_total,
                        yellow: record.yellow_total,
                        winner: record.winner()?,
                    };

                    matches::replace_rounds(conn, &id, &round_rows)?;
                    matches::update_outcome(conn, &id, current.red, current.yellow, current.winner)?;

                    let mut targets = Vec::new();
                    let mut awards_changed = 0usize;
                    for participant in matches::list_participants(conn, &id)? {
                        let result = MatchResult::for_team(participant.team()?, current.winner);
                        let award = award_for(result, &points);
                        if result.as_str() != participant.result || award != participant.award {
                            matches::update_participant_result(
                                conn,
                                &id,
                                &participant.account_id,
                                result.as_str(),
                                award,
                            )?;
                        }
                        if award != participant.award {
                            awards_changed += 1;
                        }
                        targets.push((participant.account_id, award));
                    }

                    matches::record_audit(
                        conn,
                        &id,
                        audit_actions::EDITED,
                        actor.as_deref(),
                        &json!({
                            "previous": previous,
                            "current": current,
                            "rounds": round_rows.len(),
                            "awards_changed": awards_changed,
                        }),
                    )?;
                    Ok((record, previous, targets, awards_changed))
                })
                .await?
        };

        info!(
            match_id = %match_id,
            red_total = current.red,
            yellow_total = current.yellow,
            winner = ?current.winner,
            awards_changed,
            "Match rounds edited"
        );
        self.events.emit(LedgerEvent::MatchEdited {
            match_id: match_id.to_string(),
            red_total: current.red,
            yellow_total: current.yellow,
            winner: current.winner,
        });

        // Targets cover unchanged awards too, so an earlier failed
        // correction is retried here
        let corrections = targets.into_iter().map(|(account_id, award)| {
            let store_id = record.store_id.as_str();
            async move {
                let outcome = self
                    .wallets
                    .true_up_match_credit(&account_id, match_id, award, store_id)
                    .await;
                (account_id, outcome)
            }
        });

        let mut posted = Vec::new();
        let mut failures = Vec::new();
        let mut uncredited = 0;
        for (account_id, outcome) in join_all(corrections).await {
            match outcome {
                Ok(TrueUp::Corrected(posting)) => {
                    self.events.emit(LedgerEvent::PointsCorrected {
                        account_id,
                        match_id: match_id.to_string(),
                        delta: posting.transaction.amount,
                    });
                    posted.push(posting.transaction);
                }
                Ok(TrueUp::Settled) => {}
                Ok(TrueUp::NotCredited) => uncredited += 1,
                Err(e) => {
                    warn!(match_id = %match_id, account_id = %account_id, error = %e, "Award correction failed");
                    self.events.emit(LedgerEvent::CreditFailed {
                        account_id: account_id.clone(),
                        match_id: match_id.to_string(),
                        error: e.to_string(),
                    });
                    failures.push(ParticipantFailure {
                        account_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let credit_status = if failures.is_empty() && uncredited == 0 {
            CreditStatus::Credited
        } else {
            CreditStatus::Partial
        };
        self.finish_credit_phase(match_id, credit_status, None).await;

        Ok(EditOutcome {
            match_id: match_id.to_string(),
            previous,
            current,
            corrections: posted,
            failures,
            credit_status,
        })
    }

    /// Soft delete. Credited points stay; deleting twice is a no-op.
    /// Returns whether this call changed the status.
    pub async fn delete_match(&self, match_id: &str, actor: Option<&str>) -> Result<bool, LedgerError> {
        let id = match_id.to_string();
        let actor = actor.map(str::to_string);
        let deleted = self
            .db
            .transact(move |conn| {
                let record = matches::require_match(conn, &id)?;
                let deleted = matches::mark_deleted(conn, &id)?;
                if deleted {
                    matches::record_audit(
                        conn,
                        &id,
                        audit_actions::DELETED,
                        actor.as_deref(),
                        &json!({ "previous_status": record.status }),
                    )?;
                }
                Ok(deleted)
            })
            .await?;

        if deleted {
            info!(match_id = %match_id, "Match deleted");
            self.events.emit(LedgerEvent::MatchDeleted {
                match_id: match_id.to_string(),
            });
        }
        Ok(deleted)
    }

    pub async fn get_match(&self, match_id: &str) -> Result<MatchDetail, LedgerError> {
        let id = match_id.to_string();
        self.db
            .interact(move |conn| {
                Ok(MatchDetail {
                    record: matches::require_match(conn, &id)?,
                    participants: matches::list_participants(conn, &id)?,
                    rounds: matches::list_rounds(conn, &id)?,
                    audit: matches::list_audit(conn, &id)?,
                    transactions: ledger::transactions_for_match(conn, &id)?,
                })
            })
            .await
    }

    pub async fn list_matches(&self, query: MatchQuery) -> Result<Vec<MatchRecord>, LedgerError> {
        self.db
            .interact(move |conn| matches::list_matches(conn, &query))
            .await
    }

    async fn credit_participants(
        &self,
        match_id: &str,
        store_id: &str,
        participants: &[MatchParticipant],
    ) -> CreditTally {
        let credits = participants.iter().map(|participant| async move {
            let outcome = match participant.result() {
                Ok(result) => {
                    let entry = LedgerEntry::earned(
                        &participant.account_id,
                        match_id,
                        participant.award,
                        credit_description(result, match_id),
                    )
                    .with_store(store_id);
                    self.wallets.credit_match(entry).await
                }
                Err(e) => Err(e),
            };
            (participant, outcome)
        });

        let mut tally = CreditTally {
            states: HashMap::new(),
            credited: Vec::new(),
            corrected: Vec::new(),
            already_credited: Vec::new(),
            failures: Vec::new(),
        };

        for (participant, outcome) in join_all(credits).await {
            let account_id = participant.account_id.clone();
            match outcome {
                Ok(CreditOutcome::Credited(_)) => {
                    self.events.emit(LedgerEvent::PointsCredited {
                        account_id: account_id.clone(),
                        match_id: match_id.to_string(),
                        award: participant.award,
                    });
                    tally.states.insert(account_id.clone(), CreditState::Credited);
                    tally.credited.push(account_id);
                }
                Ok(CreditOutcome::Corrected(posting)) => {
                    self.events.emit(LedgerEvent::PointsCorrected {
                        account_id: account_id.clone(),
                        match_id: match_id.to_string(),
                        delta: posting.transaction.amount,
                    });
                    tally.states.insert(account_id.clone(), CreditState::Corrected);
                    tally.corrected.push(account_id);
                }
                Ok(CreditOutcome::AlreadyCredited(_)) => {
                    self.events.emit(LedgerEvent::CreditSkipped {
                        account_id: account_id.clone(),
                        match_id: match_id.to_string(),
                    });
                    tally.states.insert(account_id.clone(), CreditState::AlreadyCredited);
                    tally.already_credited.push(account_id);
                }
                Err(e) => {
                    warn!(match_id = %match_id, account_id = %account_id, error = %e, "Participant credit failed");
                    self.events.emit(LedgerEvent::CreditFailed {
                        account_id: account_id.clone(),
                        match_id: match_id.to_string(),
                        error: e.to_string(),
                    });
                    tally.states.insert(account_id.clone(), CreditState::Failed);
                    tally.failures.push(ParticipantFailure {
                        account_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tally
    }

    /// Store the credit status, plus an audit row when `audit` is given.
    /// Failures here are logged; the credits themselves already committed.
    async fn finish_credit_phase(
        &self,
        match_id: &str,
        status: CreditStatus,
        audit: Option<(Option<&str>, serde_json::Value)>,
    ) {
        let id = match_id.to_string();
        let audit = audit.map(|(actor, detail)| (actor.map(str::to_string), detail));
        let result = self
            .db
            .transact(move |conn| {
                matches::set_credit_status(conn, &id, status)?;
                if let Some((actor, detail)) = audit {
                    matches::record_audit(conn, &id, audit_actions::RECREDITED, actor.as_deref(), &detail)?;
                }
                Ok(())
            })
            .await;

        if let Err(e) = result {
            warn!(match_id = %match_id, status = %status, error = %e, "Could not record credit status");
        }
    }
}
