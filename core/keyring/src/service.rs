//! Key service: the single owner of all key material.
//!
//! One instance holds the device identity, the active KEK and the CEK
//! registry. It is not shared; the boundary dispatcher owns it and feeds it
//! one request at a time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::cek::CekRegistry;
use crate::config::ServiceConfig;
use crate::envelope::{decrypt_record, encrypt_record, Envelope};
use crate::identity::{DeviceIdentity, DeviceKeyMaterial};
use crate::kek::{KekManager, KekSource};
use crate::rotation::{rewrap_blob, rewrap_registered};
use keywarden_common::{Error, Result, StoreId};
use keywarden_crypto::{codec, AadOverrides, WrappedBlob};
use keywarden_storage::{create_default_registry, KeyStore};

/// Non-secret snapshot of service state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub provisioned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_public_key: Option<String>,
    pub stores: Vec<StoreId>,
}

/// Envelope-encryption key service.
pub struct KeyService {
    config: ServiceConfig,
    identity: DeviceIdentity,
    kek: KekManager,
    ceks: CekRegistry,
}

impl KeyService {
    /// Create a service with an explicit key store.
    pub fn new(config: ServiceConfig, store: Arc<dyn KeyStore>) -> Result<Self> {
        Ok(Self {
            config,
            identity: DeviceIdentity::new(store)?,
            kek: KekManager::new(),
            ceks: CekRegistry::new(),
        })
    }

    /// Create a service, resolving the key store from configuration.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Key store backend failed to initialize
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let store = create_default_registry()?
            .resolve(&config.key_store.backend, config.key_store.options.clone())?;
        info!(backend = store.name(), "Key service created");
        Self::new(config, store)
    }

    /// Active configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Whether a KEK is provisioned.
    pub fn has_kek(&self) -> bool {
        self.kek.has_kek()
    }

    /// Device public key, creating the device identity on first use.
    pub async fn device_public_key(&mut self) -> Result<Vec<u8>> {
        self.identity.get_or_create_public_key().await
    }

    /// Replace the device keypair.
    pub async fn import_device_keys(&mut self, material: &DeviceKeyMaterial) -> Result<()> {
        self.identity.import(material).await
    }

    /// Export the device keypair, if configuration allows it.
    ///
    /// # Errors
    /// - `NotPermitted` if export is disabled
    pub async fn export_device_keys(&mut self) -> Result<DeviceKeyMaterial> {
        if !self.config.allow_device_key_export {
            return Err(Error::NotPermitted(
                "Device key export is disabled".to_string(),
            ));
        }
        info!("Exporting device keypair");
        self.identity.export().await
    }

    /// Delete the device identity. KEK and CEKs are unaffected.
    pub async fn reset_device_identity(&mut self) -> Result<()> {
        self.identity.reset().await
    }

    /// Provision the active KEK from `source`, replacing any previous one.
    ///
    /// # Postconditions
    /// - On failure the previous KEK is still active
    pub async fn provision_kek(&mut self, source: &KekSource) -> Result<()> {
        self.kek.provision(source, &mut self.identity).await
    }

    /// Rewrap a persisted CEK blob from the active KEK to the KEK in `next`.
    ///
    /// The active KEK is not replaced.
    ///
    /// # Errors
    /// - `KekNotProvisioned` if no KEK is active
    /// - `KekProvisionFailed` if `next` cannot be resolved
    /// - `KeyImportFailed` if `wrapped` does not open under the active KEK
    pub async fn rewrap_cek(
        &mut self,
        wrapped: &WrappedBlob,
        next: &KekSource,
    ) -> Result<WrappedBlob> {
        self.kek.require()?;
        let next = next.resolve(&mut self.identity).await?;
        rewrap_blob(self.kek.require()?, wrapped, &next)
    }

    /// Wrap the registered CEK for `store` under the KEK in `next`.
    ///
    /// The active KEK is not replaced.
    pub async fn rewrap_store(&mut self, store: &StoreId, next: &KekSource) -> Result<WrappedBlob> {
        self.kek.require()?;
        let next = next.resolve(&mut self.identity).await?;
        rewrap_registered(&self.ceks, store, self.kek.current(), &next)
    }

    /// Make sure a CEK is registered for `store`.
    ///
    /// Returns the wrapped form of a newly generated CEK when a KEK is active.
    pub fn ensure_cek(
        &mut self,
        store: &StoreId,
        wrapped: Option<&WrappedBlob>,
    ) -> Result<Option<WrappedBlob>> {
        self.ceks.ensure(store, wrapped, self.kek.current())
    }

    /// Wrap the registered CEK for `store` under the active KEK.
    ///
    /// # Errors
    /// - `KekNotProvisioned` if no KEK is active
    /// - `CekNotReady` if no CEK is registered for `store`
    pub fn wrap_cek(&self, store: &StoreId) -> Result<WrappedBlob> {
        let kek = self.kek.require()?;
        self.ceks.wrap(store, kek)
    }

    /// Encrypt a record into an envelope.
    pub fn encrypt(
        &mut self,
        store: &StoreId,
        id: Value,
        record: &Value,
        overrides: Option<&AadOverrides>,
    ) -> Result<Envelope> {
        encrypt_record(&mut self.ceks, &self.config.heal, store, id, record, overrides)
    }

    /// Decrypt an envelope back into its record.
    pub fn decrypt(&self, store: &StoreId, envelope: &Envelope) -> Result<Value> {
        decrypt_record(&self.ceks, &self.config.heal, store, envelope)
    }

    /// Drop the KEK and every CEK. The device identity is kept.
    pub fn zeroize(&mut self) {
        self.kek.clear();
        self.ceks.clear();
        info!("Key material zeroized");
    }

    /// Non-secret snapshot. Does not create a device identity.
    pub async fn status(&mut self) -> Result<ServiceStatus> {
        let device_public_key = self
            .identity
            .existing_public_key()
            .await?
            .map(|raw| codec::encode(&raw));

        Ok(ServiceStatus {
            provisioned: self.kek.has_kek(),
            device_public_key,
            stores: self.ceks.stores(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_common::SensitiveBytes;
    use keywarden_crypto::{seal_delivery, Kek, KEY_LENGTH};
    use keywarden_storage::MemoryKeyStore;
    use serde_json::json;

    fn service() -> KeyService {
        KeyService::new(ServiceConfig::default(), Arc::new(MemoryKeyStore::new())).unwrap()
    }

    fn raw(bytes: [u8; KEY_LENGTH]) -> KekSource {
        KekSource::Raw {
            raw_key: SensitiveBytes::new(bytes.to_vec()),
        }
    }

    fn store(name: &str) -> StoreId {
        StoreId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_scenario_tasks_store() {
        let mut service = service();
        service.provision_kek(&raw([0u8; KEY_LENGTH])).await.unwrap();

        let wrapped = service.ensure_cek(&store("tasks"), None).unwrap();
        assert!(wrapped.is_some());

        let envelope = service
            .encrypt(&store("tasks"), json!(1), &json!({ "name": "x" }), None)
            .unwrap();
        let aad = envelope.enc.aad.clone().unwrap();
        assert_eq!(aad.table, "tasks");
        assert_eq!(aad.id, json!(1));

        let record = service.decrypt(&store("tasks"), &envelope).unwrap();
        assert_eq!(record, json!({ "name": "x" }));
    }

    #[tokio::test]
    async fn test_idempotent_provisioning() {
        let mut service = service();
        let source = raw([4u8; KEY_LENGTH]);

        service.provision_kek(&source).await.unwrap();
        service.provision_kek(&source).await.unwrap();

        assert!(service.has_kek());
        assert!(service.status().await.unwrap().provisioned);
    }

    #[tokio::test]
    async fn test_guarded_cek_generation() {
        let mut service = service();
        let blob = Kek::from_bytes([1u8; KEY_LENGTH])
            .wrap_cek(&keywarden_crypto::Cek::generate())
            .unwrap();

        let err = service.ensure_cek(&store("tasks"), Some(&blob)).unwrap_err();

        assert!(matches!(err, Error::KekNotProvisioned));
        assert!(service.status().await.unwrap().stores.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_cek_survives_restart() {
        let source = raw([7u8; KEY_LENGTH]);

        let mut first = service();
        first.provision_kek(&source).await.unwrap();
        let wrapped = first.ensure_cek(&store("tasks"), None).unwrap().unwrap();
        let envelope = first
            .encrypt(&store("tasks"), json!(1), &json!({ "n": 1 }), None)
            .unwrap();

        let mut second = service();
        second.provision_kek(&source).await.unwrap();
        second.ensure_cek(&store("tasks"), Some(&wrapped)).unwrap();

        assert_eq!(second.decrypt(&store("tasks"), &envelope).unwrap(), json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn test_zeroize_clears_state() {
        let mut service = service();
        service.provision_kek(&raw([0u8; KEY_LENGTH])).await.unwrap();
        service.ensure_cek(&store("tasks"), None).unwrap();
        let envelope = service
            .encrypt(&store("tasks"), json!(1), &json!({}), None)
            .unwrap();
        let public = service.device_public_key().await.unwrap();

        service.zeroize();

        assert!(!service.has_kek());
        let err = service.decrypt(&store("tasks"), &envelope).unwrap_err();
        assert!(matches!(err, Error::CekNotReady(_)));
        assert_eq!(service.device_public_key().await.unwrap(), public);
    }

    #[tokio::test]
    async fn test_no_clear_cek_in_responses() {
        let known = [0xABu8; KEY_LENGTH];
        let kek = Kek::from_bytes([0u8; KEY_LENGTH]);
        let blob = kek.wrap_cek(&keywarden_crypto::Cek::from_bytes(known)).unwrap();

        let mut service = service();
        service.provision_kek(&raw([0u8; KEY_LENGTH])).await.unwrap();
        service.ensure_cek(&store("tasks"), Some(&blob)).unwrap();

        let wrapped = service.wrap_cek(&store("tasks")).unwrap();
        let rewrapped = service
            .rewrap_store(&store("tasks"), &raw([1u8; KEY_LENGTH]))
            .await
            .unwrap();
        let status = service.status().await.unwrap();

        let bodies = [
            serde_json::to_vec(&wrapped).unwrap(),
            serde_json::to_vec(&rewrapped).unwrap(),
            serde_json::to_vec(&status).unwrap(),
        ];
        let encoded = codec::encode(&known);
        for body in bodies {
            assert!(!body.windows(KEY_LENGTH).any(|w| w == known.as_slice()));
            let text = String::from_utf8(body).unwrap();
            assert!(!text.contains(&encoded));
        }
    }

    #[tokio::test]
    async fn test_rotation_via_delivery() {
        let mut service = service();
        service.provision_kek(&raw([1u8; KEY_LENGTH])).await.unwrap();
        let wrapped = service.ensure_cek(&store("tasks"), None).unwrap().unwrap();

        let public = service.device_public_key().await.unwrap();
        let delivery = seal_delivery(&public, &[2u8; KEY_LENGTH]).unwrap();
        let next = KekSource::Wrapped { wrapped: delivery };

        let rewrapped = service.rewrap_cek(&wrapped, &next).await.unwrap();
        let by_store = service.rewrap_store(&store("tasks"), &next).await.unwrap();

        let k1 = Kek::from_bytes([1u8; KEY_LENGTH]);
        let k2 = Kek::from_bytes([2u8; KEY_LENGTH]);
        let cek = k1.unwrap_cek(&wrapped).unwrap();
        assert_eq!(k2.unwrap_cek(&rewrapped).unwrap(), cek);
        assert_eq!(k2.unwrap_cek(&by_store).unwrap(), cek);

        // The active KEK is still the old one.
        let again = service.wrap_cek(&store("tasks")).unwrap();
        assert_eq!(k1.unwrap_cek(&again).unwrap(), cek);
    }

    #[tokio::test]
    async fn test_rewrap_requires_kek() {
        let mut service = service();
        let blob = Kek::from_bytes([1u8; KEY_LENGTH])
            .wrap_cek(&keywarden_crypto::Cek::generate())
            .unwrap();

        let err = service.rewrap_cek(&blob, &raw([2u8; KEY_LENGTH])).await.unwrap_err();
        assert!(matches!(err, Error::KekNotProvisioned));
    }

    #[tokio::test]
    async fn test_wrap_cek_after_late_provisioning() {
        let mut service = service();
        assert!(service.ensure_cek(&store("tasks"), None).unwrap().is_none());
        assert!(matches!(
            service.wrap_cek(&store("tasks")),
            Err(Error::KekNotProvisioned)
        ));

        service.provision_kek(&raw([3u8; KEY_LENGTH])).await.unwrap();
        let wrapped = service.wrap_cek(&store("tasks")).unwrap();

        assert!(Kek::from_bytes([3u8; KEY_LENGTH]).unwrap_cek(&wrapped).is_ok());
    }

    #[tokio::test]
    async fn test_export_gated_by_config() {
        let config = ServiceConfig {
            allow_device_key_export: false,
            ..Default::default()
        };
        let mut service = KeyService::new(config, Arc::new(MemoryKeyStore::new())).unwrap();

        let err = service.export_device_keys().await.unwrap_err();
        assert!(matches!(err, Error::NotPermitted(_)));
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let mut service = service();
        let status = service.status().await.unwrap();
        assert!(status.device_public_key.is_none());

        let public = service.device_public_key().await.unwrap();
        service.ensure_cek(&store("b"), None).unwrap();
        service.ensure_cek(&store("a"), None).unwrap();

        let status = service.status().await.unwrap();
        assert_eq!(status.device_public_key, Some(codec::encode(&public)));
        assert_eq!(status.stores, vec![store("a"), store("b")]);

        service.reset_device_identity().await.unwrap();
        assert!(service.status().await.unwrap().device_public_key.is_none());
        assert_eq!(service.status().await.unwrap().stores.len(), 2);
    }

    #[tokio::test]
    async fn test_from_config_local_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServiceConfig {
            key_store: crate::config::KeyStoreConfig::local(dir.path()),
            ..Default::default()
        };

        let public = {
            let mut service = KeyService::from_config(config.clone()).unwrap();
            service.device_public_key().await.unwrap()
        };

        let mut reopened = KeyService::from_config(config).unwrap();
        assert_eq!(reopened.device_public_key().await.unwrap(), public);
    }
}
