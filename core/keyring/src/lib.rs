//! Key service for Keywarden.
//!
//! This module provides:
//! - Device identity lifecycle on a private key store
//! - KEK provisioning from raw keys or sealed server deliveries
//! - Per-store CEK registry with wrap and rotation
//! - Record envelopes with bound associated data and bounded auto-heal
//!
//! # Architecture
//! [`KeyService`] owns all key material. It has a single owner and is
//! driven by the boundary dispatcher, which serializes requests into it.

pub mod cek;
pub mod config;
pub mod envelope;
pub mod heal;
pub mod identity;
pub mod kek;
pub mod rotation;
pub mod service;

pub use cek::CekRegistry;
pub use config::{HealPolicy, KeyStoreConfig, ServiceConfig};
pub use envelope::{EncryptedRecord, Envelope, EnvelopeMeta, ALG_A256GCM};
pub use heal::{DecryptAttempt, EncryptAttempt};
pub use identity::{DeviceIdentity, DeviceKeyMaterial, DEVICE_KEYPAIR_SLOT};
pub use kek::{KekManager, KekSource};
pub use service::{KeyService, ServiceStatus};
