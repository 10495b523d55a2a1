//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use carematch_ledger::db::{CreateAccountInput, Role};
use carematch_ledger::services::{RoundInput, SettleRequest};
use carematch_ledger::{Config, LedgerDb, LedgerError, Notification, NotificationChannel, Services};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Records deliveries, or rejects every send when `failing`
#[derive(Default)]
pub struct RecordingChannel {
    pub failing: bool,
    pub sent: Mutex<Vec<Notification>>,
    pub attempts: Mutex<u32>,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, notification: &Notification) -> Result<(), LedgerError> {
        *self.attempts.lock().unwrap() += 1;
        if self.failing {
            return Err(LedgerError::Notification("push gateway unavailable".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub services: Services,
    pub db: Arc<LedgerDb>,
    pub channel: Arc<RecordingChannel>,
    dispatcher: JoinHandle<()>,
    _temp: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_channel(RecordingChannel::default()).await
    }

    /// On-disk database with a real pool, plus store-a/store-b accounts
    pub async fn with_channel(channel: RecordingChannel) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_dir = temp.path().to_path_buf();
        config.pool_size = 4;
        config.notifications.max_attempts = 2;
        config.notifications.initial_backoff_ms = 1;
        config.notifications.max_backoff_ms = 2;

        let db = Arc::new(LedgerDb::open(&config.database_path(), config.pool_size).unwrap());
        let channel = Arc::new(channel);
        let (services, dispatcher) = Services::new(db.clone(), &config, channel.clone());

        let harness = Self {
            services,
            db,
            channel,
            dispatcher,
            _temp: temp,
        };
        harness.seed().await;
        harness
    }

    async fn seed(&self) {
        let accounts = &self.services.accounts;
        for (id, store, name) in [
            ("red-1", "store-a", "Mabel"),
            ("red-2", "store-a", "Arthur"),
            ("yellow-1", "store-a", "Edna"),
            ("yellow-2", "store-a", "Walter"),
            ("far-1", "store-b", "Iris"),
        ] {
            let mut input = CreateAccountInput::participant(id, store);
            input.display_name = Some(name.to_string());
            accounts.create(input).await.unwrap();
        }
        accounts
            .create(CreateAccountInput::new("op-a", Role::Operator, Some("store-a")))
            .await
            .unwrap();
        accounts
            .create(CreateAccountInput::new("op-b", Role::Operator, Some("store-b")))
            .await
            .unwrap();
        accounts
            .create(CreateAccountInput::new("carer-1", Role::Caregiver, None))
            .await
            .unwrap();
    }

    /// Drop the services and wait for queued notifications to finish
    pub async fn shutdown(self) -> Arc<RecordingChannel> {
        let Harness {
            services,
            channel,
            dispatcher,
            _temp,
            ..
        } = self;
        drop(services);
        dispatcher.await.unwrap();
        channel
    }
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Red beats yellow 8-3 over two rounds
pub fn red_wins_8_3() -> SettleRequest {
    SettleRequest {
        match_id: None,
        store_id: "store-a".into(),
        rounds: vec![RoundInput::new(5, 1, "evidence/end-1.jpg"), RoundInput::new(3, 2, "evidence/end-2.jpg")],
        red_team: ids(&["red-1", "red-2"]),
        yellow_team: ids(&["yellow-1", "yellow-2"]),
        recorded_by: Some("op-a".into()),
    }
}
