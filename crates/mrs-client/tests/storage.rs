//! File-backed credential persistence

use chrono::{TimeZone, Utc};
use mrs_client::{CredentialStore, FileStore, KeyRegistry};
use mrs_core::{Identity, IdentityRecord};
use std::sync::Arc;
use tempfile::TempDir;

fn store(dir: &TempDir) -> FileStore {
    FileStore::new(dir.path().join("mrs"))
}

#[tokio::test]
async fn test_empty_directory_loads_nothing() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    assert!(store.load_identity().await.unwrap().is_none());
    assert!(store.load_tokens().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_identity_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let identity = Identity::generate("alice", "example.com").unwrap();

    store.save_identity(&IdentityRecord::from(&identity)).await.unwrap();
    assert!(store.identity_path().exists());

    let loaded = Identity::try_from(store.load_identity().await.unwrap().unwrap()).unwrap();
    assert_eq!(loaded, identity);
    assert!(loaded.has_private_key());
}

#[tokio::test]
async fn test_registry_persists_tokens_and_identity() {
    let dir = TempDir::new().unwrap();
    let expires = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

    {
        let registry = KeyRegistry::load(Arc::new(store(&dir))).await.unwrap();
        registry.generate_identity("alice", "example.com").await.unwrap();
        registry
            .store_bearer_token("https://a.example/", "token-a", Some(expires))
            .await
            .unwrap();
        registry.store_bearer_token("https://b.example", "token-b", None).await.unwrap();
        registry.remove_bearer_token("https://b.example").await.unwrap();
    }

    let registry = KeyRegistry::load(Arc::new(store(&dir))).await.unwrap();
    assert_eq!(registry.identity().unwrap().id(), "alice@example.com");
    assert_eq!(registry.bearer_token("https://a.example").as_deref(), Some("token-a"));
    assert_eq!(
        registry.token_record("https://a.example").unwrap().expires_at,
        Some(expires)
    );
    assert_eq!(registry.bearer_token("https://b.example"), None);
}

#[tokio::test]
async fn test_corrupt_files_load_as_empty() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.identity_path(), "{not json").unwrap();
    std::fs::write(store.tokens_path(), "[]").unwrap();

    assert!(store.load_identity().await.unwrap().is_none());
    assert!(store.load_tokens().await.unwrap().is_empty());

    let registry = KeyRegistry::load(Arc::new(store)).await.unwrap();
    assert!(!registry.has_identity());
}

#[tokio::test]
async fn test_unusable_identity_is_ignored() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(
        store.identity_path(),
        r#"{"id": "alice@example.com", "public_key": "AAAA", "key_id": "key-2026-01"}"#,
    )
    .unwrap();

    let registry = KeyRegistry::load(Arc::new(store)).await.unwrap();
    assert!(registry.identity().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_files_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.tokens_path(), "{}").unwrap();
    std::fs::set_permissions(store.tokens_path(), std::fs::Permissions::from_mode(0o644)).unwrap();

    let registry = KeyRegistry::load(Arc::new(store.clone())).await.unwrap();
    registry.store_bearer_token("https://a.example", "secret", None).await.unwrap();
    registry.generate_identity("alice", "example.com").await.unwrap();

    for path in [store.tokens_path(), store.identity_path()] {
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "{} is not owner-only", path.display());
    }
}
