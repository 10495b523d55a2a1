//! Identity of the account driving an operation
//!
//! The identity provider is external. The ledger only asks it who is
//! acting; operator-facing operations fail closed when it has no answer.
//!
//! Two providers ship with the crate:
//! - [`StaticIdentity`] for tests and trusted tooling
//! - [`JwtIdentity`] for HS256 bearer tokens issued by [`JwtValidator`]

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::db::Role;
use crate::error::LedgerError;

/// The authenticated account as the identity provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentAccount {
    pub id: String,
    pub role: Role,
    pub store_id: Option<String>,
}

/// Source of the current account
pub trait IdentityProvider: Send + Sync {
    fn current_account(&self) -> Option<CurrentAccount>;
}

/// The current account, or `Unauthorized` when nobody is signed in
pub fn require_current(provider: &dyn IdentityProvider) -> Result<CurrentAccount, LedgerError> {
    provider
        .current_account()
        .ok_or_else(|| LedgerError::Unauthorized("No authenticated account".into()))
}

/// Fixed identity
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    current: Option<CurrentAccount>,
}

impl StaticIdentity {
    pub fn new(current: CurrentAccount) -> Self {
        Self {
            current: Some(current),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_account(&self) -> Option<CurrentAccount> {
        self.current.clone()
    }
}

// ============================================================================
// Bearer tokens
// ============================================================================

/// Payload stored in a bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub role: Role,
    #[serde(default)]
    pub store_id: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// HS256 token signer and verifier
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Returns an error if the secret is shorter than 32 characters
    pub fn new(secret: impl Into<String>, expiry_seconds: u64) -> Result<Self, LedgerError> {
        let secret = secret.into();
        if secret.len() < 32 {
            return Err(LedgerError::Config(
                "jwt_secret must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    pub fn generate_token(&self, account: &CurrentAccount) -> Result<String, LedgerError> {
        let now = unix_now()?;
        let claims = Claims {
            sub: account.id.clone(),
            role: account.role,
            store_id: account.store_id.clone(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| LedgerError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify a token and return the account it names
    pub fn verify_token(&self, token: &str) -> Result<CurrentAccount, LedgerError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidToken => "Invalid token",
                ErrorKind::InvalidSignature => "Invalid signature",
                _ => "Token validation failed",
            };
            LedgerError::Unauthorized(reason.into())
        })?;

        Ok(CurrentAccount {
            id: data.claims.sub,
            role: data.claims.role,
            store_id: data.claims.store_id,
        })
    }
}

fn unix_now() -> Result<u64, LedgerError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| LedgerError::Internal(format!("System time error: {}", e)))
}

/// Extract the token from an `Authorization: Bearer <token>` value
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    auth_header.and_then(|h| h.strip_prefix("Bearer ")).map(str::trim)
}

/// Identity taken from a bearer token. An invalid or missing token yields no
/// current account.
#[derive(Debug, Clone)]
pub struct JwtIdentity {
    current: Option<CurrentAccount>,
}

impl JwtIdentity {
    pub fn from_token(validator: &JwtValidator, token: Option<&str>) -> Self {
        let current = token.and_then(|t| match validator.verify_token(t) {
            Ok(account) => Some(account),
            Err(e) => {
                debug!(error = %e, "Rejected bearer token");
                None
            }
        });
        Self { current }
    }

    pub fn from_header(validator: &JwtValidator, auth_header: Option<&str>) -> Self {
        Self::from_token(validator, extract_token_from_header(auth_header))
    }
}

impl IdentityProvider for JwtIdentity {
    fn current_account(&self) -> Option<CurrentAccount> {
        self.current.clone()
    }
}
