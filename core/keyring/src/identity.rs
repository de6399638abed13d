//! Device identity: the long-lived P-256 keypair that receives KEK deliveries.
//!
//! The pair is generated lazily on first use and persisted to the private
//! key store under a fixed slot. It survives [`crate::KeyService::zeroize`];
//! only [`DeviceIdentity::reset`] removes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use keywarden_common::{Error, KeySlot, Result, SensitiveBytes};
use keywarden_crypto::codec;
use keywarden_crypto::DeviceKeyPair;
use keywarden_storage::KeyStore;

/// Slot holding the persisted device keypair.
pub const DEVICE_KEYPAIR_SLOT: &str = "device-keypair";

/// Transport and storage form of the device keypair.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyMaterial {
    /// Private key as JWK JSON text.
    pub private_key_jwk: String,
    /// Uncompressed SEC1 public key, base64.
    pub public_key_raw_base64: String,
}

impl DeviceKeyMaterial {
    fn from_pair(pair: &DeviceKeyPair) -> Self {
        Self {
            private_key_jwk: pair.to_private_jwk().to_string(),
            public_key_raw_base64: codec::encode(&pair.public_key_raw()),
        }
    }

    /// Parse into a keypair.
    ///
    /// # Errors
    /// - `KeyImportFailed` if either half is malformed or they do not match
    pub fn to_pair(&self) -> Result<DeviceKeyPair> {
        let public_raw = codec::decode(&self.public_key_raw_base64)
            .map_err(|e| Error::KeyImportFailed(e.to_string()))?;
        DeviceKeyPair::from_parts(&self.private_key_jwk, &public_raw)
    }
}

impl fmt::Debug for DeviceKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKeyMaterial")
            .field("private_key_jwk", &"[REDACTED]")
            .field("public_key_raw_base64", &self.public_key_raw_base64)
            .finish()
    }
}

/// Holder of the device keypair and its persistent store.
pub struct DeviceIdentity {
    store: Arc<dyn KeyStore>,
    slot: KeySlot,
    pair: Option<DeviceKeyPair>,
}

impl DeviceIdentity {
    /// Create an identity backed by `store`. Nothing is read until first use.
    pub fn new(store: Arc<dyn KeyStore>) -> Result<Self> {
        Ok(Self {
            store,
            slot: KeySlot::new(DEVICE_KEYPAIR_SLOT)?,
            pair: None,
        })
    }

    async fn load(&mut self) -> Result<Option<&DeviceKeyPair>> {
        if self.pair.is_none() {
            if let Some(bytes) = self.store.get(&self.slot).await? {
                let material: DeviceKeyMaterial = serde_json::from_slice(bytes.as_bytes())
                    .map_err(|e| Error::Storage(format!("Corrupt device keypair: {}", e)))?;
                self.pair = Some(material.to_pair()?);
                debug!(store = self.store.name(), "Loaded device keypair");
            }
        }
        Ok(self.pair.as_ref())
    }

    async fn persist(&self, pair: &DeviceKeyPair) -> Result<()> {
        let material = DeviceKeyMaterial::from_pair(pair);
        let bytes = SensitiveBytes::new(serde_json::to_vec(&material)?);
        self.store.put(&self.slot, bytes).await
    }

    /// Return the keypair, generating and persisting one on first use.
    ///
    /// # Postconditions
    /// - Subsequent calls return the same pair until import or reset
    ///
    /// # Errors
    /// - Storage errors while reading or persisting
    pub async fn get_or_create(&mut self) -> Result<&DeviceKeyPair> {
        if self.load().await?.is_none() {
            let pair = DeviceKeyPair::generate();
            self.persist(&pair).await?;
            info!(store = self.store.name(), "Generated device keypair");
            self.pair = Some(pair);
        }
        self.pair
            .as_ref()
            .ok_or_else(|| Error::Storage("Device keypair unavailable".to_string()))
    }

    /// Uncompressed SEC1 public key, creating the pair if needed.
    pub async fn get_or_create_public_key(&mut self) -> Result<Vec<u8>> {
        Ok(self.get_or_create().await?.public_key_raw())
    }

    /// Public key of an existing pair, without creating one.
    pub async fn existing_public_key(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.load().await?.map(DeviceKeyPair::public_key_raw))
    }

    /// Replace the pair with imported material.
    ///
    /// # Postconditions
    /// - On success the new pair is persisted and active
    /// - On failure the existing pair is untouched
    ///
    /// # Errors
    /// - `KeyImportFailed` for malformed or mismatched material
    /// - Storage errors while persisting
    pub async fn import(&mut self, material: &DeviceKeyMaterial) -> Result<()> {
        let pair = material.to_pair()?;
        self.persist(&pair).await?;
        self.pair = Some(pair);
        info!(store = self.store.name(), "Imported device keypair");
        Ok(())
    }

    /// Export the pair, creating it if needed.
    pub async fn export(&mut self) -> Result<DeviceKeyMaterial> {
        let pair = self.get_or_create().await?;
        Ok(DeviceKeyMaterial::from_pair(pair))
    }

    /// Delete the persisted pair and drop it from memory.
    pub async fn reset(&mut self) -> Result<()> {
        let removed = self.store.delete(&self.slot).await?;
        self.pair = None;
        info!(store = self.store.name(), removed, "Reset device identity");
        Ok(())
    }
}
