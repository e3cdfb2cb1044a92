//! # MRS Core
//!
//! Core types and primitives for the MRS (Mixed Reality Service) protocol, a
//! federated directory that maps physical space to service endpoints in the
//! way DNS maps names to addresses.
//!
//! ## Key Concepts
//!
//! - **Location / Sphere**: WGS84 coordinates and the spherical regions that
//!   registrations claim
//! - **Registration**: A binding of a region to a service point, or an
//!   explicit refusal to expose one (FOAD)
//! - **Referral**: A pointer from one server to another, followed during
//!   federated search
//! - **Identity**: A `user@domain` principal with an Ed25519 key pair
//! - **Signature base**: The canonical request representation signed with the
//!   identity's key (RFC 9421 style HTTP message signatures)
//!
//! This crate performs no I/O. Network access, credential persistence and the
//! federated resolver live in `mrs-client`.

pub mod crypto;
pub mod error;
pub mod geo;
pub mod signing;
pub mod types;
pub mod validation;

pub use crypto::{Identity, IdentityRecord, PublicKeyExport};
pub use error::{ErrorKind, MrsError, Result};
pub use signing::{sign_request, verify_signature, SignatureParams, SignedHeaders};
pub use types::{
    AuthInfo, Location, Referral, Registration, RegistrationPage, RegistrationRequest,
    SearchResult, ServerInfo, Sphere,
};
pub use validation::{sanitize_service_point_uri, validate_service_point_uri};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
