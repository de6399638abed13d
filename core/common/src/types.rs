//! Common types used throughout Keywarden.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Identifier of a logical data partition ("store") owning one CEK.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreId(String);

impl StoreId {
    /// Create a new StoreId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "StoreId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StoreId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<StoreId> for String {
    fn from(id: StoreId) -> Self {
        id.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a slot in a persistent key store.
///
/// Slot names double as file names for filesystem-backed stores, so they
/// are restricted to ASCII alphanumerics, `-`, `_` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeySlot(String);

impl KeySlot {
    /// Create a slot name.
    ///
    /// # Errors
    /// - Returns error if the name is empty, starts with `.`, or contains
    ///   characters outside the allowed set
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Key slot name cannot be empty".to_string(),
            ));
        }
        if name.starts_with('.') {
            return Err(crate::Error::InvalidInput(
                "Key slot name cannot start with '.'".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(crate::Error::InvalidInput(format!(
                "Key slot name contains invalid characters: {}",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the slot name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeySlot {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<KeySlot> for String {
    fn from(slot: KeySlot) -> Self {
        slot.0
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_creation() {
        let id = StoreId::new("tasks").unwrap();
        assert_eq!(id.as_str(), "tasks");
    }

    #[test]
    fn test_store_id_empty_fails() {
        assert!(StoreId::new("").is_err());
    }

    #[test]
    fn test_store_id_serde_rejects_empty() {
        let id: StoreId = serde_json::from_str("\"projects\"").unwrap();
        assert_eq!(id.as_str(), "projects");
        assert!(serde_json::from_str::<StoreId>("\"\"").is_err());
    }

    #[test]
    fn test_key_slot_validation() {
        assert!(KeySlot::new("device-keypair").is_ok());
        assert!(KeySlot::new("v1.state_2").is_ok());
        assert!(KeySlot::new("").is_err());
        assert!(KeySlot::new("../escape").is_err());
        assert!(KeySlot::new("a/b").is_err());
        assert!(KeySlot::new(".hidden").is_err());
    }

    #[test]
    fn test_sensitive_bytes_debug_is_redacted() {
        let bytes = SensitiveBytes::new(vec![7u8; 32]);
        let debug = format!("{:?}", bytes);
        assert_eq!(debug, "SensitiveBytes([REDACTED; 32 bytes])");
    }
}
