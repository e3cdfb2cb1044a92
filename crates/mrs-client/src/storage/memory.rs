//! In-memory credential store
//!
//! Data is lost when the store is dropped.

use async_trait::async_trait;
use mrs_core::IdentityRecord;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use super::{CredentialStore, StorageError, TokenMap};

/// In-memory credential store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    identity: RwLock<Option<IdentityRecord>>,
    tokens: RwLock<TokenMap>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load_identity(&self) -> Result<Option<IdentityRecord>, StorageError> {
        let identity = self.identity.read().unwrap_or_else(PoisonError::into_inner);
        Ok(identity.clone())
    }

    async fn save_identity(&self, record: &IdentityRecord) -> Result<(), StorageError> {
        let mut identity = self.identity.write().unwrap_or_else(PoisonError::into_inner);
        debug!(id = %record.id, "Storing identity in memory");
        *identity = Some(record.clone());
        Ok(())
    }

    async fn load_tokens(&self) -> Result<TokenMap, StorageError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens.clone())
    }

    async fn save_tokens(&self, new_tokens: &TokenMap) -> Result<(), StorageError> {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        *tokens = new_tokens.clone();
        Ok(())
    }
}
