//! Common error types for Keywarden.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for Keywarden operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key material could not be parsed or did not match its counterpart.
    #[error("Key import failed: {0}")]
    KeyImportFailed(String),

    /// ECDH, HKDF or payload decryption failed while provisioning a KEK.
    #[error("KEK provisioning failed: {0}")]
    KekProvisionFailed(String),

    /// The operation needs a KEK and none is held.
    #[error("KEK not provisioned")]
    KekNotProvisioned,

    /// No CEK is registered for the store.
    #[error("CEK not ready for store '{0}'")]
    CekNotReady(String),

    /// Record encryption failed after the bounded recovery attempts.
    #[error("Encryption failed: {0}")]
    EncryptFailed(String),

    /// Record decryption failed after the bounded recovery attempts.
    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    /// Malformed or unsupported boundary request.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The AEAD rejected the operation (tag mismatch or key out of sync).
    #[error("Cipher operation rejected: {0}")]
    CipherOperation(String),

    /// Other cryptographic failure (bad lengths, invalid points).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Key store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The key service task is no longer running.
    #[error("Key service stopped")]
    ServiceStopped,
}

impl Error {
    /// Whether this is the fault class the auto-heal path may retry.
    pub fn is_key_desync(&self) -> bool {
        matches!(self, Error::CipherOperation(_))
    }

    /// Wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyImportFailed(_) => ErrorKind::KeyImportFailed,
            Error::KekProvisionFailed(_) => ErrorKind::KekProvisionFailed,
            Error::KekNotProvisioned => ErrorKind::KekNotProvisioned,
            Error::CekNotReady(_) => ErrorKind::CekNotReady,
            Error::EncryptFailed(_) => ErrorKind::EncryptFailed,
            Error::DecryptFailed(_) => ErrorKind::DecryptFailed,
            Error::UnknownOperation(_) => ErrorKind::UnknownOperation,
            Error::Storage(_) | Error::Io(_) => ErrorKind::StorageFailed,
            Error::InvalidInput(_) | Error::Serialization(_) => ErrorKind::InvalidRequest,
            Error::NotPermitted(_) => ErrorKind::NotPermitted,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::CipherOperation(_) | Error::Crypto(_) | Error::ServiceStopped => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Error classification carried across the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyImportFailed,
    KekProvisionFailed,
    KekNotProvisioned,
    CekNotReady,
    EncryptFailed,
    DecryptFailed,
    UnknownOperation,
    StorageFailed,
    InvalidRequest,
    NotPermitted,
    NotFound,
    Internal,
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
