//! Key Registry for the MRS client
//!
//! Owns:
//! - The local identity (Ed25519 key pair plus `user@domain` id)
//! - Bearer tokens per server
//!
//! State is cached in memory and written through to a [`CredentialStore`] on
//! every mutation. No network calls happen here.

use chrono::{DateTime, Utc};
use mrs_core::{
    signing::{self, SignedHeaders},
    Identity, IdentityRecord, MrsError, PublicKeyExport, Result,
};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::search::normalize_server_url;
use crate::storage::{CredentialStore, MemoryStore, TokenMap, TokenRecord};

/// Identity and bearer-token store
///
/// Reads are lock-protected and may be shared freely; writes persist before
/// returning.
pub struct KeyRegistry {
    /// Current local identity
    identity: RwLock<Option<Identity>>,

    /// Normalized server URL -> token
    tokens: RwLock<TokenMap>,

    store: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Token values stay out of logs
        f.debug_struct("KeyRegistry")
            .field("identity", &*read(&self.identity))
            .field("servers", &self.servers())
            .field("store", &self.store)
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl KeyRegistry {
    /// Load the registry from a credential store
    ///
    /// An identity record that no longer decodes is ignored with a warning,
    /// as if none were stored.
    pub async fn load(store: Arc<dyn CredentialStore>) -> Result<Self> {
        let identity = match store.load_identity().await? {
            Some(record) => {
                let id = record.id.clone();
                match Identity::try_from(record) {
                    Ok(identity) => Some(identity),
                    Err(e) => {
                        warn!(id = %id, error = %e, "Ignoring unusable stored identity");
                        None
                    }
                }
            }
            None => None,
        };

        let tokens: TokenMap = store
            .load_tokens()
            .await?
            .into_iter()
            .map(|(server, record)| (normalize_server_url(&server), record))
            .collect();

        info!(
            identity = ?identity.as_ref().map(Identity::id),
            tokens = tokens.len(),
            "Key registry loaded"
        );

        Ok(Self {
            identity: RwLock::new(identity),
            tokens: RwLock::new(tokens),
            store,
        })
    }

    /// Empty registry backed by a [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self {
            identity: RwLock::new(None),
            tokens: RwLock::new(TokenMap::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    // =========================================================================
    // Identity Management
    // =========================================================================

    /// Current identity, if one is configured
    pub fn identity(&self) -> Option<Identity> {
        read(&self.identity).clone()
    }

    pub fn has_identity(&self) -> bool {
        read(&self.identity).is_some()
    }

    /// Generate and persist a fresh identity, replacing any existing one
    pub async fn generate_identity(&self, username: &str, domain: &str) -> Result<Identity> {
        let identity = Identity::generate(username, domain)?;
        self.set_identity(identity.clone()).await?;
        info!(id = %identity.id(), key_id = %identity.key_id(), "Generated new identity");
        Ok(identity)
    }

    /// Persist and adopt an identity
    pub async fn set_identity(&self, identity: Identity) -> Result<()> {
        self.store
            .save_identity(&IdentityRecord::from(&identity))
            .await?;
        *write(&self.identity) = Some(identity);
        Ok(())
    }

    /// Public key document for the current identity
    pub fn export_public_key(&self) -> Result<PublicKeyExport> {
        read(&self.identity)
            .as_ref()
            .map(Identity::export_public_key)
            .ok_or_else(|| MrsError::authentication("No identity configured"))
    }

    /// Sign a request with the current identity
    ///
    /// # Errors
    /// `Authentication` when no identity is configured or it cannot sign.
    pub fn sign_request(
        &self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<SignedHeaders> {
        let identity = read(&self.identity);
        signing::sign_request_now(method, url, body, identity.as_ref())
    }

    // =========================================================================
    // Bearer Tokens
    // =========================================================================

    /// Token for a server (trailing slashes ignored)
    pub fn bearer_token(&self, server: &str) -> Option<String> {
        self.token_record(server).map(|r| r.token)
    }

    pub fn token_record(&self, server: &str) -> Option<TokenRecord> {
        read(&self.tokens).get(&normalize_server_url(server)).cloned()
    }

    /// Store a token for a server, replacing any previous one
    pub async fn store_bearer_token(
        &self,
        server: &str,
        token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let server = normalize_server_url(server);
        let mut record = TokenRecord::new(token);
        record.expires_at = expires_at;

        let snapshot = {
            let mut tokens = write(&self.tokens);
            tokens.insert(server.clone(), record);
            tokens.clone()
        };
        self.store.save_tokens(&snapshot).await?;

        info!(server = %server, "Stored bearer token");
        Ok(())
    }

    /// Remove the token for a server; returns whether one existed
    pub async fn remove_bearer_token(&self, server: &str) -> Result<bool> {
        let server = normalize_server_url(server);
        let (removed, snapshot) = {
            let mut tokens = write(&self.tokens);
            let removed = tokens.remove(&server).is_some();
            (removed, tokens.clone())
        };

        if removed {
            self.store.save_tokens(&snapshot).await?;
            info!(server = %server, "Removed bearer token");
        }
        Ok(removed)
    }

    /// Servers with a stored token
    pub fn servers(&self) -> Vec<String> {
        read(&self.tokens).keys().cloned().collect()
    }

    /// `Authorization: Bearer <token>` for a server, or nothing
    pub fn auth_headers(&self, server: &str) -> Vec<(String, String)> {
        match self.bearer_token(server) {
            Some(token) => vec![("Authorization".to_string(), format!("Bearer {}", token))],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrs_core::signing::verify_signature;

    #[test]
    fn test_no_identity_by_default() {
        let registry = KeyRegistry::in_memory();
        assert!(registry.identity().is_none());
        assert!(registry.export_public_key().unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn test_generate_identity() {
        let registry = KeyRegistry::in_memory();
        let identity = registry.generate_identity("testuser", "example.com").await.unwrap();

        assert_eq!(identity.id(), "testuser@example.com");
        assert_eq!(identity.public_key_bytes().len(), 32);
        assert_eq!(registry.identity(), Some(identity));
    }

    #[tokio::test]
    async fn test_identity_persists_through_store() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());

        let first = KeyRegistry::load(store.clone()).await.unwrap();
        let identity = first.generate_identity("testuser", "example.com").await.unwrap();

        let second = KeyRegistry::load(store).await.unwrap();
        let loaded = second.identity().unwrap();
        assert_eq!(loaded.id(), identity.id());
        assert_eq!(loaded.public_key_bytes(), identity.public_key_bytes());
        assert!(loaded.has_private_key());
    }

    #[tokio::test]
    async fn test_bearer_tokens() {
        let registry = KeyRegistry::in_memory();
        assert_eq!(registry.bearer_token("https://nonexistent.example"), None);

        registry
            .store_bearer_token("https://example.com/", "my-token", None)
            .await
            .unwrap();
        assert_eq!(
            registry.bearer_token("https://example.com").as_deref(),
            Some("my-token")
        );
        assert_eq!(registry.servers(), vec!["https://example.com".to_string()]);

        assert!(registry.remove_bearer_token("https://example.com").await.unwrap());
        assert!(!registry.remove_bearer_token("https://example.com").await.unwrap());
        assert_eq!(registry.bearer_token("https://example.com"), None);
    }

    #[tokio::test]
    async fn test_auth_headers() {
        let registry = KeyRegistry::in_memory();
        assert!(registry.auth_headers("https://example.com").is_empty());

        registry
            .store_bearer_token("https://example.com", "my-token", None)
            .await
            .unwrap();
        assert_eq!(
            registry.auth_headers("https://example.com"),
            vec![("Authorization".to_string(), "Bearer my-token".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sign_request() {
        let registry = KeyRegistry::in_memory();
        let err = registry
            .sign_request("POST", "https://example.com/register", None)
            .unwrap_err();
        assert!(err.is_auth());

        let identity = registry.generate_identity("testuser", "example.com").await.unwrap();
        let body: &[u8] = br#"{"test": "data"}"#;
        let headers = registry
            .sign_request("POST", "https://example.com/register", Some(body))
            .unwrap();
        assert_eq!(headers.mrs_identity, "testuser@example.com");
        assert!(headers.content_digest.is_some());

        assert!(verify_signature(
            "POST",
            "/register",
            Some(body),
            &headers.into_map(),
            &identity.public_key_bytes()
        ));
    }

    #[tokio::test]
    async fn test_export_public_key() {
        let registry = KeyRegistry::in_memory();
        registry.generate_identity("testuser", "example.com").await.unwrap();

        let export = registry.export_public_key().unwrap();
        assert_eq!(export.id, "testuser@example.com");
        assert_eq!(export.public_key.key_type, "Ed25519");
    }
}
