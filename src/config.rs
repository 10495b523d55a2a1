//! Configuration for carematch-ledger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LedgerError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("carematch-ledger")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Maximum pooled connections for file databases
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default)]
    pub points: PointsConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    /// HS256 secret for bearer tokens (CLI identity)
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// Point awards and bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsConfig {
    #[serde(default = "default_win_award")]
    pub win_award: i64,
    #[serde(default = "default_draw_award")]
    pub draw_award: i64,
    #[serde(default = "default_loss_award")]
    pub loss_award: i64,

    /// Maximum members per team roster
    #[serde(default = "default_max_team_size")]
    pub max_team_size: usize,

    /// Inclusive bounds for grants and redemptions
    #[serde(default = "default_min_grant")]
    pub min_grant: i64,
    #[serde(default = "default_max_grant")]
    pub max_grant: i64,

    /// Maximum grant reason length in characters
    #[serde(default = "default_max_reason_len")]
    pub max_reason_len: usize,
}

impl PointsConfig {
    /// Settlement never debits honor and a grant never debits local
    pub fn validate(&self) -> Result<(), LedgerError> {
        for (name, award) in [
            ("win_award", self.win_award),
            ("draw_award", self.draw_award),
            ("loss_award", self.loss_award),
        ] {
            if award < 0 {
                return Err(LedgerError::Config(format!("points.{} must not be negative, got {}", name, award)));
            }
        }
        if self.min_grant < 1 || self.min_grant > self.max_grant {
            return Err(LedgerError::Config(format!(
                "points grant bounds must satisfy 1 <= min_grant <= max_grant, got [{}, {}]",
                self.min_grant, self.max_grant
            )));
        }
        if self.max_team_size < 1 {
            return Err(LedgerError::Config("points.max_team_size must be at least 1".into()));
        }
        if self.max_reason_len < 1 {
            return Err(LedgerError::Config("points.max_reason_len must be at least 1".into()));
        }
        Ok(())
    }
}

/// Notification queue and delivery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Push gateway endpoint; notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_database_file() -> String {
    "ledger.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_win_award() -> i64 {
    100
}

fn default_draw_award() -> i64 {
    50
}

fn default_loss_award() -> i64 {
    10
}

fn default_max_team_size() -> usize {
    6
}

fn default_min_grant() -> i64 {
    1
}

fn default_max_grant() -> i64 {
    10_000
}

fn default_max_reason_len() -> usize {
    200
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            win_award: default_win_award(),
            draw_award: default_draw_award(),
            loss_award: default_loss_award(),
            max_team_size: default_max_team_size(),
            min_grant: default_min_grant(),
            max_grant: default_max_grant(),
            max_reason_len: default_max_reason_len(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            webhook_url: None,
        }
    }
}

impl NotificationConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            pool_size: default_pool_size(),
            points: PointsConfig::default(),
            notifications: NotificationConfig::default(),
            jwt_secret: None,
        }
    }
}

impl Config {
    /// Load and validate config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        self.points.validate()?;
        if self.notifications.max_attempts == 0 {
            return Err(LedgerError::Config("notifications.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_product_rules() {
        let config = Config::default();
        assert_eq!(config.points.win_award, 100);
        assert_eq!(config.points.draw_award, 50);
        assert_eq!(config.points.loss_award, 10);
        assert_eq!(config.points.max_team_size, 6);
        assert_eq!(config.points.max_grant, 10_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            database_file = "points.db"

            [points]
            win_award = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.database_file, "points.db");
        assert_eq!(config.points.win_award, 120);
        assert_eq!(config.points.loss_award, 10);
        assert_eq!(config.notifications.max_attempts, 3);
    }

    #[test]
    fn test_out_of_range_points_are_rejected() {
        assert!(Config::default().validate().is_ok());

        let mut points = PointsConfig::default();
        points.loss_award = -10;
        assert!(matches!(points.validate(), Err(LedgerError::Config(_))));

        let mut points = PointsConfig::default();
        points.min_grant = -50;
        assert!(matches!(points.validate(), Err(LedgerError::Config(_))));

        let mut points = PointsConfig::default();
        points.min_grant = 20;
        points.max_grant = 10;
        assert!(matches!(points.validate(), Err(LedgerError::Config(_))));

        let mut points = PointsConfig::default();
        points.max_team_size = 0;
        assert!(matches!(points.validate(), Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_load_rejects_negative_award() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[points]\nloss_award = -10\n").unwrap();

        assert!(matches!(Config::load(&path), Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.notifications.webhook_url = Some("http://localhost:9000/push".into());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.database_path(), dir.path().join("ledger.db"));
    }
}
