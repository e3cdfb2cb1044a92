//! Credential persistence
//!
//! The [`KeyRegistry`](crate::KeyRegistry) keeps the live identity and token
//! map in memory and writes through to a [`CredentialStore`] on every change.
//! Two backends are provided: [`MemoryStore`] for tests and ephemeral use, and
//! [`FileStore`] for `identity.json` / `tokens.json` in a config directory.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mrs_core::{IdentityRecord, MrsError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StorageError> for MrsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(msg) => MrsError::connection("credential-store", msg),
            StorageError::Serialization(msg) => {
                MrsError::validation(format!("Credential store: {}", msg))
            }
        }
    }
}

/// Bearer token for one server
///
/// Expiry is informational; nothing evicts expired tokens automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp <= Utc::now()).unwrap_or(false)
    }
}

/// Server URL → token
pub type TokenMap = BTreeMap<String, TokenRecord>;

/// Storage backend for the local identity and bearer tokens
///
/// Storage is process-local; implementations must be thread-safe but are not
/// expected to arbitrate conflicting writers across processes.
#[async_trait]
pub trait CredentialStore: Send + Sync + Debug {
    /// Load the persisted identity, if any
    async fn load_identity(&self) -> Result<Option<IdentityRecord>, StorageError>;

    /// Replace the persisted identity
    async fn save_identity(&self, record: &IdentityRecord) -> Result<(), StorageError>;

    /// Load all bearer tokens
    async fn load_tokens(&self) -> Result<TokenMap, StorageError>;

    /// Replace all bearer tokens
    async fn save_tokens(&self, tokens: &TokenMap) -> Result<(), StorageError>;
}
