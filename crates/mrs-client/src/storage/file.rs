//! File-backed credential store
//!
//! Layout inside the config directory:
//! - `identity.json`: `{id, public_key, private_key?, key_id}`, keys base64
//! - `tokens.json`: `{"<server>": {"token": ..., "expires_at": ...}}`
//!
//! Both files are written with mode 0600 on Unix. A file that fails to parse
//! loads as empty, so a corrupt token file never locks the user out of
//! re-authenticating.

use async_trait::async_trait;
use mrs_core::IdentityRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{CredentialStore, StorageError, TokenMap};

const IDENTITY_FILE: &str = "identity.json";
const TOKENS_FILE: &str = "tokens.json";

/// Credential store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identity_path(&self) -> PathBuf {
        self.dir.join(IDENTITY_FILE)
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.dir.join(TOKENS_FILE)
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt credential file");
                Ok(None)
            }
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_vec_pretty(value)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        // `mode` only applies on creation; tighten files that already existed
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        debug!(path = %path.display(), "Wrote credential file");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load_identity(&self) -> Result<Option<IdentityRecord>, StorageError> {
        Self::read_json(&self.identity_path()).await
    }

    async fn save_identity(&self, record: &IdentityRecord) -> Result<(), StorageError> {
        self.write_json(&self.identity_path(), record).await
    }

    async fn load_tokens(&self) -> Result<TokenMap, StorageError> {
        Ok(Self::read_json(&self.tokens_path())
            .await?
            .unwrap_or_default())
    }

    async fn save_tokens(&self, tokens: &TokenMap) -> Result<(), StorageError> {
        self.write_json(&self.tokens_path(), tokens).await
    }
}
