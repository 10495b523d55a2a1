//! Error types for carematch-ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or out-of-range input, rejected before any persistence
    #[error("Validation error: {0}")]
    Validation(String),

    /// Role or affiliation mismatch, rejected before any persistence
    #[error("Permission denied: {0}")]
    Permission(String),

    /// No caller identity available
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Insufficient funds for {account_id}: honor {honor_balance} {honor_delta:+}, local {local_balance} {local_delta:+}"
    )]
    InsufficientFunds {
        account_id: String,
        honor_balance: i64,
        local_balance: i64,
        honor_delta: i64,
        local_delta: i64,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// True for errors raised before anything was written
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Permission(_)
                | Self::Unauthorized(_)
                | Self::NotFound(_)
                | Self::InsufficientFunds { .. }
        )
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LedgerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds {
            account_id: "p-1".into(),
            honor_balance: 0,
            local_balance: 20,
            honor_delta: 0,
            local_delta: -50,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds for p-1: honor 0 +0, local 20 -50"
        );
        assert!(err.is_rejection());
    }

    #[test]
    fn test_internal_is_not_rejection() {
        assert!(!LedgerError::Internal("boom".into()).is_rejection());
    }
}
