//! Identities and Ed25519 key material
//!
//! An MRS identity is a `user@domain` principal. The public key is published
//! at `https://<domain>/.well-known/mrs/keys/<user>`; the private key is only
//! held for the local identity and is absent for identities observed on
//! other parties.
//!
//! Key types:
//! - `Identity`: id, verifying key, optional signing key, key id
//! - `IdentityRecord`: base64 persisted form of an identity
//! - `PublicKeyExport`: the public document a user publishes

use crate::error::{MrsError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Ed25519 identity used to sign requests
#[derive(Clone)]
pub struct Identity {
    /// `user@domain`
    id: String,
    /// Key identifier, e.g. `key-2025-01`
    key_id: String,
    verifying_key: VerifyingKey,
    signing_key: Option<SigningKey>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("key_id", &self.key_id)
            .field("has_private_key", &self.signing_key.is_some())
            .finish()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.key_id == other.key_id
            && self.verifying_key == other.verifying_key
            && self.has_private_key() == other.has_private_key()
    }
}

/// Split `user@domain`, requiring both halves to be non-empty
fn split_identity(id: &str) -> Result<(&str, &str)> {
    match id.split_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok((user, domain))
        }
        _ => Err(MrsError::validation(format!(
            "Identity must have the form user@domain, got '{}'",
            id
        ))),
    }
}

/// Key identifier for a key created now: `key-YYYY-MM`
pub fn current_key_id() -> String {
    format!("key-{}", Utc::now().format("%Y-%m"))
}

impl Identity {
    /// Generate a fresh identity with a new Ed25519 key pair
    pub fn generate(username: &str, domain: &str) -> Result<Self> {
        let id = format!("{}@{}", username, domain);
        split_identity(&id)?;

        let signing_key = SigningKey::generate(&mut OsRng);
        Ok(Self {
            id,
            key_id: current_key_id(),
            verifying_key: signing_key.verifying_key(),
            signing_key: Some(signing_key),
        })
    }

    /// Build an identity from raw key bytes
    ///
    /// When a private key is supplied it must correspond to the public key.
    pub fn from_parts(
        id: impl Into<String>,
        public_key: &[u8],
        private_key: Option<&[u8]>,
        key_id: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        split_identity(&id)?;

        let public: [u8; 32] = public_key
            .try_into()
            .map_err(|_| MrsError::authentication("Invalid public key length"))?;
        let verifying_key = VerifyingKey::from_bytes(&public)?;

        let signing_key = match private_key {
            Some(bytes) => {
                let secret: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| MrsError::authentication("Invalid private key length"))?;
                let signing_key = SigningKey::from_bytes(&secret);
                if signing_key.verifying_key() != verifying_key {
                    return Err(MrsError::authentication(
                        "Private key does not match public key",
                    ));
                }
                Some(signing_key)
            }
            None => None,
        };

        Ok(Self {
            id,
            key_id: key_id.into(),
            verifying_key,
            signing_key,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Part of the id before `@`
    pub fn username(&self) -> &str {
        self.id.split_once('@').map(|(u, _)| u).unwrap_or(self.id.as_str())
    }

    /// Part of the id after `@`
    pub fn domain(&self) -> &str {
        self.id.split_once('@').map(|(_, d)| d).unwrap_or_default()
    }

    /// URL where the public key is published, including the key id fragment
    pub fn key_url(&self) -> String {
        format!(
            "https://{}/.well-known/mrs/keys/{}#{}",
            self.domain(),
            self.username(),
            self.key_id
        )
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn private_key_bytes(&self) -> Option<[u8; 32]> {
        self.signing_key.as_ref().map(SigningKey::to_bytes)
    }

    pub fn has_private_key(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Copy of this identity without the private key
    pub fn public_only(&self) -> Self {
        Self {
            signing_key: None,
            ..self.clone()
        }
    }

    /// Sign raw bytes
    ///
    /// # Errors
    /// `MrsError::Authentication` when the identity has no private key.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64]> {
        let signing_key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| MrsError::authentication("Cannot sign without private key"))?;
        Ok(signing_key.sign(message).to_bytes())
    }

    /// Verify a raw signature against this identity's public key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_with_key(&self.public_key_bytes(), message, signature)
    }

    /// Public document for publishing at the key URL
    pub fn export_public_key(&self) -> PublicKeyExport {
        PublicKeyExport {
            id: self.id.clone(),
            public_key: PublicKeyDocument {
                key_type: "Ed25519".to_string(),
                key: STANDARD.encode(self.public_key_bytes()),
            },
            key_id: self.key_id.clone(),
        }
    }
}

/// Verify an Ed25519 signature given raw public key bytes
///
/// Malformed keys or signatures verify as `false`.
pub fn verify_with_key(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public) else {
        return false;
    };
    let Ok(sig) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    verifying_key
        .verify(message, &Signature::from_bytes(&sig))
        .is_ok()
}

// ============================================================================
// Serialized forms
// ============================================================================

/// Persisted identity, keys base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub key_id: String,
}

impl From<&Identity> for IdentityRecord {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            public_key: STANDARD.encode(identity.public_key_bytes()),
            private_key: identity.private_key_bytes().map(|k| STANDARD.encode(k)),
            key_id: identity.key_id.clone(),
        }
    }
}

impl TryFrom<IdentityRecord> for Identity {
    type Error = MrsError;

    fn try_from(record: IdentityRecord) -> Result<Self> {
        let public = STANDARD.decode(&record.public_key)?;
        let private = record
            .private_key
            .as_deref()
            .map(|k| STANDARD.decode(k))
            .transpose()?;
        Identity::from_parts(record.id, &public, private.as_deref(), record.key_id)
    }
}

/// Public key document: `{id, public_key: {type, key}, key_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyExport {
    pub id: String,
    pub public_key: PublicKeyDocument,
    pub key_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyDocument {
    #[serde(rename = "type")]
    pub key_type: String,
    /// Base64 raw public key
    pub key: String,
}

impl PublicKeyExport {
    /// Decode the published key into a public-only identity
    pub fn to_identity(&self) -> Result<Identity> {
        if self.public_key.key_type != "Ed25519" {
            return Err(MrsError::validation(format!(
                "Unsupported key type: {}",
                self.public_key.key_type
            )));
        }
        let bytes = STANDARD.decode(&self.public_key.key)?;
        Identity::from_parts(self.id.clone(), &bytes, None, self.key_id.clone())
    }
}
