//! Bearer credential supplied by the caller.

use crate::errors::{TransferError, TransferResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An access token plus the moment it stops being accepted.
#[derive(Serialize, Deserialize, Clone)]
pub struct Credential {
    /// Usually `Bearer`.
    pub token_type: String,

    pub access_token: String,

    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        token_type: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Credential with the `Bearer` type that expires `expires_in` from now.
    pub fn bearer(access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self::new("Bearer", access_token, Utc::now() + expires_in)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Rejects empty and expired tokens. Never retried.
    pub fn ensure_usable(&self) -> TransferResult<()> {
        if self.access_token.trim().is_empty() {
            return Err(TransferError::config("access token is empty"));
        }
        if self.is_expired() {
            return Err(TransferError::config(format!(
                "access token expired at {}",
                self.expires_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        let token_type = if self.token_type.trim().is_empty() {
            "Bearer"
        } else {
            self.token_type.trim()
        };
        format!("{} {}", token_type, self.access_token)
    }
}

// Keeps the token out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
