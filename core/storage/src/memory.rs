//! In-memory key store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::store::{KeyStore, SlotMetadata};
use keywarden_common::{Error, KeySlot, Result, SensitiveBytes};

/// In-memory key store.
///
/// Useful for testing and ephemeral sessions. All data is held in memory
/// and lost on drop; values are zeroized when removed or dropped.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    entries: Arc<RwLock<HashMap<KeySlot, (SensitiveBytes, DateTime<Utc>)>>>,
}

type Entries = HashMap<KeySlot, (SensitiveBytes, DateTime<Utc>)>;

impl MemoryKeyStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| Error::Storage("Memory key store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|_| Error::Storage("Memory key store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, slot: &KeySlot) -> Result<Option<SensitiveBytes>> {
        Ok(self.read()?.get(slot).map(|(value, _)| value.clone()))
    }

    async fn put(&self, slot: &KeySlot, value: SensitiveBytes) -> Result<()> {
        self.write()?.insert(slot.clone(), (value, Utc::now()));
        Ok(())
    }

    async fn delete(&self, slot: &KeySlot) -> Result<bool> {
        Ok(self.write()?.remove(slot).is_some())
    }

    async fn list(&self) -> Result<Vec<SlotMetadata>> {
        let entries = self.read()?;
        let mut slots: Vec<SlotMetadata> = entries
            .iter()
            .map(|(slot, (value, modified))| SlotMetadata {
                slot: slot.clone(),
                size: value.len() as u64,
                modified: *modified,
            })
            .collect();
        slots.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(slots)
    }
}
