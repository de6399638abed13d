//! Key store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keywarden_common::{KeySlot, Result, SensitiveBytes};

/// Metadata for a stored slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    /// Slot name.
    pub slot: KeySlot,
    /// Size of the stored value in bytes.
    pub size: u64,
    /// Last write time.
    pub modified: DateTime<Utc>,
}

/// Private persistent store for long-lived key material.
///
/// Values are opaque byte strings addressed by a fixed slot name. Reads of a
/// missing slot are not errors; they return `None`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read the value stored in a slot.
    ///
    /// # Postconditions
    /// - Returns `None` if the slot has never been written or was deleted
    ///
    /// # Errors
    /// - I/O errors from the backend
    async fn get(&self, slot: &KeySlot) -> Result<Option<SensitiveBytes>>;

    /// Write a value to a slot, replacing any existing value.
    ///
    /// # Postconditions
    /// - A subsequent `get` returns exactly `value`
    /// - A failed write leaves the previous value intact
    async fn put(&self, slot: &KeySlot, value: SensitiveBytes) -> Result<()>;

    /// Delete a slot.
    ///
    /// Returns `true` if a value was removed.
    async fn delete(&self, slot: &KeySlot) -> Result<bool>;

    /// List stored slots.
    async fn list(&self) -> Result<Vec<SlotMetadata>>;
}
