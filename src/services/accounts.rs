//! Account directory service

use std::sync::Arc;

use tracing::{debug, info};

use super::events::{EventBus, LedgerEvent};
use crate::db::accounts::{self, AccountQuery, CreateAccountInput};
use crate::db::{Account, CaregiverLink, LedgerDb};
use crate::error::LedgerError;

pub struct AccountService {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
}

impl AccountService {
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub async fn create(&self, input: CreateAccountInput) -> Result<Account, LedgerError> {
        let account = self
            .db
            .transact(move |conn| accounts::create_account(conn, input))
            .await?;

        info!(account_id = %account.id, role = %account.role, "Account created");
        self.events.emit(LedgerEvent::AccountCreated {
            id: account.id.clone(),
            role: account.role.clone(),
        });
        Ok(account)
    }

    pub async fn get(&self, account_id: &str) -> Result<Account, LedgerError> {
        let id = account_id.to_string();
        self.db
            .interact(move |conn| accounts::require_account(conn, &id))
            .await
    }

    pub async fn list(&self, query: AccountQuery) -> Result<Vec<Account>, LedgerError> {
        self.db
            .interact(move |conn| accounts::list_accounts(conn, &query))
            .await
    }

    /// Link a caregiver to a participant
    pub async fn link(&self, caregiver_id: &str, participant_id: &str) -> Result<CaregiverLink, LedgerError> {
        let (c, p) = (caregiver_id.to_string(), participant_id.to_string());
        let link = self
            .db
            .transact(move |conn| accounts::link_caregiver(conn, &c, &p))
            .await?;

        info!(caregiver_id = %caregiver_id, participant_id = %participant_id, "Caregiver linked");
        self.events.emit(LedgerEvent::CaregiverLinked {
            caregiver_id: caregiver_id.to_string(),
            participant_id: participant_id.to_string(),
        });
        Ok(link)
    }

    pub async fn unlink(&self, caregiver_id: &str, participant_id: &str) -> Result<bool, LedgerError> {
        let (c, p) = (caregiver_id.to_string(), participant_id.to_string());
        let removed = self
            .db
            .transact(move |conn| accounts::unlink_caregiver(conn, &c, &p))
            .await?;

        if removed {
            info!(caregiver_id = %caregiver_id, participant_id = %participant_id, "Caregiver unlinked");
            self.events.emit(LedgerEvent::CaregiverUnlinked {
                caregiver_id: caregiver_id.to_string(),
                participant_id: participant_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Caregivers to notify about a participant
    pub async fn interested_parties(&self, participant_id: &str) -> Result<Vec<String>, LedgerError> {
        let id = participant_id.to_string();
        let parties = self
            .db
            .interact(move |conn| accounts::interested_parties(conn, &id))
            .await?;
        debug!(participant_id = %participant_id, count = parties.len(), "Resolved interested parties");
        Ok(parties)
    }

    /// Copy legacy single links into the join table
    pub async fn backfill_links(&self) -> Result<usize, LedgerError> {
        let created = self
            .db
            .transact(accounts::backfill_legacy_links)
            .await?;
        info!(created = created, "Backfilled legacy caregiver links");
        Ok(created)
    }
}
