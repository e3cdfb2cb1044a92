//! # MRS Client
//!
//! Async client for the MRS federated space registry.
//!
//! This crate provides:
//! - **Search Resolver**: bounded breadth-first crawl across servers,
//!   following referrals, with deduplicated and deterministically ordered
//!   results
//! - **Key Registry**: the local identity and per-server bearer tokens,
//!   persisted through a [`CredentialStore`]
//! - **Client facade**: register, release, list, server info and auth checks
//!   with HTTP status codes mapped onto [`MrsError`] kinds
//! - **Transport**: a minimal request/response seam with a `reqwest`
//!   implementation and an in-memory reference network for tests
//!
//! ## Example
//!
//! ```ignore
//! use mrs_client::{ClientConfig, KeyRegistry, MrsClient};
//! use mrs_core::Location;
//!
//! let registry = KeyRegistry::in_memory();
//! let client = MrsClient::with_defaults(ClientConfig::from_env(), registry.into())?;
//! let result = client.search(Location::point(-33.8568, 151.2153)?, 100.0).await?;
//! ```

pub mod client;
pub mod config;
pub mod keys;
pub mod search;
pub mod storage;
pub mod transport;

pub use client::MrsClient;
pub use config::ClientConfig;
pub use keys::KeyRegistry;
pub use search::{normalize_server_url, ResolverConfig, SearchResolver};
pub use storage::{CredentialStore, FileStore, MemoryStore, StorageError, TokenRecord};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, MockFault, MockNetwork, MockServer,
    Transport,
};

pub use mrs_core::{MrsError, Result};
