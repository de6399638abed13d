//! Cryptographic primitives for Keywarden.
//!
//! This crate provides:
//! - Authenticated encryption using AES-256-GCM
//! - Key derivation using HKDF-SHA256
//! - P-256 ECDH device keypairs and KEK delivery
//! - Zeroizing KEK/CEK types with wrap, unwrap and rewrap
//! - Base64 and associated-data encoding
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - Key types never expose their bytes outside this crate
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod blob;
pub mod codec;
pub mod ecdh;
pub mod kdf;
pub mod keys;

pub use blob::{open_delivery, seal_delivery, KekDelivery, WrappedBlob};
pub use codec::{AadContext, AadOverrides};
pub use ecdh::DeviceKeyPair;
pub use keys::{generate_raw_key, Cek, Kek, KEY_LENGTH};
