//! Persistent key store abstraction for Keywarden.
//!
//! The device identity lives in a private store addressed by fixed slot
//! names. This crate provides the trait, an in-memory backend, a local
//! filesystem backend, and a registry that resolves a backend from config.

pub mod local;
pub mod memory;
pub mod registry;
pub mod store;

pub use local::LocalKeyStore;
pub use memory::MemoryKeyStore;
pub use registry::{create_default_registry, KeyStoreFactory, KeyStoreRegistry};
pub use store::{KeyStore, SlotMetadata};
