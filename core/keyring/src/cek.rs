//! CEK registry: one content-encryption key per store.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use keywarden_common::{Error, Result, StoreId};
use keywarden_crypto::{Cek, Kek, WrappedBlob};

/// Registry of in-memory CEKs keyed by store.
#[derive(Debug, Default)]
pub struct CekRegistry {
    entries: HashMap<StoreId, Cek>,
}

impl CekRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a CEK is registered for `store`.
    ///
    /// - Already registered: no side effect, returns `None`.
    /// - `wrapped` given: unwraps it under `kek` and registers it.
    /// - Neither: generates a fresh CEK and returns its wrapped form if a KEK
    ///   is available.
    ///
    /// # Errors
    /// - `KekNotProvisioned` if `wrapped` is given without a KEK; no CEK is
    ///   generated in that case
    /// - `KeyImportFailed` if `wrapped` does not open under `kek`
    pub fn ensure(
        &mut self,
        store: &StoreId,
        wrapped: Option<&WrappedBlob>,
        kek: Option<&Kek>,
    ) -> Result<Option<WrappedBlob>> {
        if self.entries.contains_key(store) {
            debug!(store = %store, "CEK already registered");
            return Ok(None);
        }

        match wrapped {
            Some(blob) => {
                let kek = kek.ok_or(Error::KekNotProvisioned)?;
                let cek = kek.unwrap_cek(blob).map_err(|e| {
                    Error::KeyImportFailed(format!(
                        "Wrapped CEK for '{}' did not open: {}",
                        store, e
                    ))
                })?;
                self.entries.insert(store.clone(), cek);
                info!(store = %store, "Registered unwrapped CEK");
                Ok(None)
            }
            None => {
                let cek = Cek::generate();
                let wrapped = kek.map(|k| k.wrap_cek(&cek)).transpose()?;
                self.entries.insert(store.clone(), cek);
                info!(store = %store, wrapped = wrapped.is_some(), "Generated CEK");
                Ok(wrapped)
            }
        }
    }

    /// Pure lookup; never generates.
    pub fn get(&self, store: &StoreId) -> Option<&Cek> {
        self.entries.get(store)
    }

    /// Lookup that fails with `CekNotReady` when nothing is registered.
    pub fn require(&self, store: &StoreId) -> Result<&Cek> {
        self.get(store)
            .ok_or_else(|| Error::CekNotReady(store.to_string()))
    }

    /// Replace the CEK for `store` with a freshly generated one.
    ///
    /// Anything sealed under the previous CEK can no longer be opened.
    pub fn regenerate(&mut self, store: &StoreId) -> &Cek {
        warn!(store = %store, "Replacing CEK; data under the previous key becomes unreadable");
        match self.entries.entry(store.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(Cek::generate());
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(Cek::generate()),
        }
    }

    /// Wrap the registered CEK for `store` under `kek`.
    ///
    /// # Errors
    /// - `CekNotReady` if no CEK is registered
    pub fn wrap(&self, store: &StoreId, kek: &Kek) -> Result<WrappedBlob> {
        kek.wrap_cek(self.require(store)?)
    }

    /// Registered stores, sorted.
    pub fn stores(&self) -> Vec<StoreId> {
        let mut stores: Vec<StoreId> = self.entries.keys().cloned().collect();
        stores.sort();
        stores
    }

    /// Drop every CEK. Their memory is zeroized.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        debug!(count, "Cleared CEK registry");
    }
}
