//! Service configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use keywarden_common::{Error, Result};
use keywarden_storage::create_default_registry;

/// Which key store backend holds the device identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Backend name (e.g., "memory", "local").
    pub backend: String,
    /// Backend-specific options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl KeyStoreConfig {
    /// Ephemeral in-memory store.
    pub fn memory() -> Self {
        Self {
            backend: "memory".to_string(),
            options: serde_json::Value::Null,
        }
    }

    /// Filesystem store rooted at `root`.
    pub fn local(root: impl AsRef<Path>) -> Self {
        Self {
            backend: "local".to_string(),
            options: serde_json::json!({ "root": root.as_ref().to_string_lossy() }),
        }
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

/// Toggles for the bounded auto-heal retries.
///
/// The defaults enable every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealPolicy {
    /// On a key-desync fault during encrypt, regenerate the store's CEK once
    /// and retry. Ciphertext under the replaced CEK becomes unreadable.
    pub regenerate_on_encrypt: bool,
    /// As a last encrypt attempt, seal without associated data.
    pub aadless_fallback: bool,
    /// On a key-desync fault during decrypt, retry once with the same CEK.
    pub retry_decrypt: bool,
}

impl HealPolicy {
    /// Policy with every retry disabled.
    pub fn strict() -> Self {
        Self {
            regenerate_on_encrypt: false,
            aadless_fallback: false,
            retry_decrypt: false,
        }
    }
}

impl Default for HealPolicy {
    fn default() -> Self {
        Self {
            regenerate_on_encrypt: true,
            aadless_fallback: true,
            retry_decrypt: true,
        }
    }
}

/// Configuration for a key service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Private store for the device identity.
    pub key_store: KeyStoreConfig,
    /// Auto-heal retry policy.
    pub heal: HealPolicy,
    /// Whether `ExportDeviceKeys` may return the private key.
    pub allow_device_key_export: bool,
    /// Depth of the request queue in front of the service.
    pub channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            key_store: KeyStoreConfig::default(),
            heal: HealPolicy::default(),
            allow_device_key_export: true,
            channel_capacity: 64,
        }
    }
}

impl ServiceConfig {
    /// Check the configuration for values the service cannot run with.
    ///
    /// # Errors
    /// - Zero channel capacity
    /// - Unknown key store backend
    /// - `local` backend without a `root` option
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::InvalidInput(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        let registry = create_default_registry()?;
        if !registry.has_backend(&self.key_store.backend) {
            return Err(Error::InvalidInput(format!(
                "Unknown key store backend '{}'; expected one of {:?}",
                self.key_store.backend,
                registry.backends()
            )));
        }

        if self.key_store.backend == "local"
            && self.key_store.options.get("root").and_then(|v| v.as_str()).is_none()
        {
            return Err(Error::InvalidInput(
                "Local key store requires 'root' path".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::from_bytes(&std::fs::read(path)?)?;
        config.validate()?;
        Ok(config)
    }
}
