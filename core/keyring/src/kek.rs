//! KEK manager.
//!
//! Holds at most one key-encryption key. A new KEK is fully derived before
//! the old one is replaced, so a failed provision never leaves a partial
//! state behind.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::identity::DeviceIdentity;
use keywarden_common::{Error, Result, SensitiveBytes};
use keywarden_crypto::codec::b64_sensitive;
use keywarden_crypto::{open_delivery, Kek, KekDelivery};

/// Where a KEK comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KekSource {
    /// Raw key bytes, for bootstrap and development.
    Raw {
        #[serde(rename = "rawKey", with = "b64_sensitive")]
        raw_key: SensitiveBytes,
    },
    /// A server delivery sealed to the device key.
    Wrapped { wrapped: KekDelivery },
}

impl KekSource {
    /// Parse a source received from outside the service.
    ///
    /// # Errors
    /// - `KekProvisionFailed` if the value is neither a raw key nor a
    ///   well-formed delivery
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::KekProvisionFailed(format!("Malformed KEK source: {}", e)))
    }

    /// Resolve the source into a key.
    ///
    /// The delivery path creates the device identity if it does not exist yet.
    ///
    /// # Errors
    /// - `KekProvisionFailed` if the raw key is not 256 bits or the delivery
    ///   cannot be opened
    pub async fn resolve(&self, identity: &mut DeviceIdentity) -> Result<Kek> {
        match self {
            KekSource::Raw { raw_key } => Kek::from_slice(raw_key.as_bytes())
                .map_err(|e| Error::KekProvisionFailed(e.to_string())),
            KekSource::Wrapped { wrapped } => {
                let device = identity.get_or_create().await?;
                open_delivery(device, wrapped)
            }
        }
    }
}

/// Holder of the single active KEK.
#[derive(Debug, Default)]
pub struct KekManager {
    current: Option<Kek>,
}

impl KekManager {
    /// Create a manager with no KEK.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a KEK is provisioned.
    pub fn has_kek(&self) -> bool {
        self.current.is_some()
    }

    /// Install `kek` as the active KEK, replacing any previous one.
    pub fn install(&mut self, kek: Kek) {
        let replaced = self.current.replace(kek).is_some();
        info!(replaced, "KEK provisioned");
    }

    /// Resolve `source` and install the result.
    ///
    /// # Postconditions
    /// - On failure the previous KEK, if any, is still active
    pub async fn provision(
        &mut self,
        source: &KekSource,
        identity: &mut DeviceIdentity,
    ) -> Result<()> {
        let kek = source.resolve(identity).await?;
        self.install(kek);
        Ok(())
    }

    /// The active KEK, if any.
    pub fn current(&self) -> Option<&Kek> {
        self.current.as_ref()
    }

    /// The active KEK.
    ///
    /// # Errors
    /// - `KekNotProvisioned` if there is none
    pub fn require(&self) -> Result<&Kek> {
        self.current.as_ref().ok_or(Error::KekNotProvisioned)
    }

    /// Drop the active KEK. Its memory is zeroized.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_crypto::{seal_delivery, DeviceKeyPair, KEY_LENGTH};
    use keywarden_storage::MemoryKeyStore;
    use std::sync::Arc;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(Arc::new(MemoryKeyStore::new())).unwrap()
    }

    fn raw(bytes: &[u8]) -> KekSource {
        KekSource::Raw {
            raw_key: SensitiveBytes::new(bytes.to_vec()),
        }
    }

    #[tokio::test]
    async fn test_provision_raw() {
        let mut manager = KekManager::new();
        let mut identity = identity();
        assert!(!manager.has_kek());

        manager.provision(&raw(&[0u8; KEY_LENGTH]), &mut identity).await.unwrap();

        assert!(manager.has_kek());
        assert_eq!(manager.require().unwrap(), &Kek::from_bytes([0u8; KEY_LENGTH]));
    }

    #[tokio::test]
    async fn test_provision_twice_is_idempotent() {
        let mut manager = KekManager::new();
        let mut identity = identity();
        let source = raw(&[5u8; KEY_LENGTH]);

        manager.provision(&source, &mut identity).await.unwrap();
        manager.provision(&source, &mut identity).await.unwrap();

        assert!(manager.has_kek());
        assert_eq!(manager.require().unwrap(), &Kek::from_bytes([5u8; KEY_LENGTH]));
    }

    #[tokio::test]
    async fn test_provision_delivery() {
        let mut manager = KekManager::new();
        let mut identity = identity();
        let public = identity.get_or_create_public_key().await.unwrap();

        let delivery = seal_delivery(&public, &[9u8; KEY_LENGTH]).unwrap();
        manager
            .provision(&KekSource::Wrapped { wrapped: delivery }, &mut identity)
            .await
            .unwrap();

        assert_eq!(manager.require().unwrap(), &Kek::from_bytes([9u8; KEY_LENGTH]));
    }

    #[tokio::test]
    async fn test_failed_provision_keeps_previous_kek() {
        let mut manager = KekManager::new();
        let mut identity = identity();
        manager.provision(&raw(&[1u8; KEY_LENGTH]), &mut identity).await.unwrap();

        let stranger = DeviceKeyPair::generate();
        let delivery = seal_delivery(&stranger.public_key_raw(), &[2u8; KEY_LENGTH]).unwrap();
        let err = manager
            .provision(&KekSource::Wrapped { wrapped: delivery }, &mut identity)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KekProvisionFailed(_)));

        let err = manager.provision(&raw(&[1u8; 16]), &mut identity).await.unwrap_err();
        assert!(matches!(err, Error::KekProvisionFailed(_)));

        assert_eq!(manager.require().unwrap(), &Kek::from_bytes([1u8; KEY_LENGTH]));
    }

    #[test]
    fn test_clear() {
        let mut manager = KekManager::new();
        manager.install(Kek::from_bytes([1u8; KEY_LENGTH]));
        manager.clear();

        assert!(!manager.has_kek());
        assert!(matches!(manager.require(), Err(Error::KekNotProvisioned)));
    }

    #[test]
    fn test_malformed_source_is_provision_failure() {
        let device = DeviceKeyPair::generate();
        let delivery = seal_delivery(&device.public_key_raw(), &[1u8; KEY_LENGTH]).unwrap();
        let wire = serde_json::to_value(&delivery).unwrap();

        let mut bad_point = wire.clone();
        bad_point["ephemeralPublicKey"] = serde_json::json!("!!!notb64");
        let mut no_salt = wire;
        no_salt.as_object_mut().unwrap().remove("salt");

        for value in [
            serde_json::json!({ "wrapped": bad_point }),
            serde_json::json!({ "wrapped": no_salt }),
            serde_json::json!({ "rawKey": "%%%" }),
            serde_json::json!({}),
        ] {
            let err = KekSource::from_value(value).unwrap_err();
            assert!(matches!(err, Error::KekProvisionFailed(_)), "got {:?}", err);
        }
    }

    #[test]
    fn test_source_wire_forms() {
        let raw: KekSource = serde_json::from_str(r#"{ "rawKey": "AAAA" }"#).unwrap();
        assert!(matches!(raw, KekSource::Raw { ref raw_key } if raw_key.len() == 3));

        let device = DeviceKeyPair::generate();
        let delivery = seal_delivery(&device.public_key_raw(), &[1u8; KEY_LENGTH]).unwrap();
        let json = serde_json::json!({ "wrapped": delivery });
        let wrapped: KekSource = serde_json::from_value(json).unwrap();
        assert!(matches!(wrapped, KekSource::Wrapped { .. }));
    }
}
