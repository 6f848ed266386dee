//! Where the services get their bearer credential from.
//!
//! Token acquisition and refresh live outside this crate; a provider only hands
//! out whatever it holds, and the services reject it if it is unusable.

use crate::errors::{TransferError, TransferResult};
use crate::models::credential::Credential;
use async_trait::async_trait;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the current credential, or `None` if none is available.
    async fn credential(&self) -> Option<Credential>;
}

/// Fetch a credential and fail fast when it is absent or expired.
pub async fn usable_credential(provider: &dyn CredentialProvider) -> TransferResult<Credential> {
    let credential = provider
        .credential()
        .await
        .ok_or_else(|| TransferError::config("no access token available"))?;
    credential.ensure_usable()?;
    Ok(credential)
}

/// A fixed credential, e.g. read from the environment at startup.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    credential: Option<Credential>,
}

impl StaticCredentials {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }

    pub fn none() -> Self {
        Self { credential: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }
}
