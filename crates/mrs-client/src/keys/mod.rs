//! Identity & key management

pub mod registry;

pub use registry::KeyRegistry;
