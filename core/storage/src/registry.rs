//! Backend registry for resolving key stores from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::KeyStore;
use keywarden_common::{Error, Result};

/// Factory function type for creating key stores.
pub type KeyStoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn KeyStore>> + Send + Sync>;

/// Registry for key store factories.
///
/// Allows registration and resolution of key store backends by name and
/// configuration.
pub struct KeyStoreRegistry {
    factories: HashMap<String, KeyStoreFactory>,
}

impl KeyStoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: KeyStoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Key store backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a key store by backend name and configuration.
    ///
    /// # Errors
    /// - Backend not found
    /// - Configuration invalid for the backend
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn KeyStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Key store backend '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for KeyStoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
pub fn create_default_registry() -> Result<KeyStoreRegistry> {
    let mut registry = KeyStoreRegistry::new();

    registry.register(
        "memory",
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryKeyStore::new()))),
    )?;

    registry.register(
        "local",
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local key store requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalKeyStore::new(root)?))
        }),
    )?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeyStore;
    use serde_json::json;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = KeyStoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryKeyStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = KeyStoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryKeyStore::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryKeyStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = KeyStoreRegistry::new();
        assert!(registry.resolve("unknown", Value::Null).is_err());
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry().unwrap();
        assert_eq!(registry.backends(), vec!["local", "memory"]);
        assert_eq!(registry.resolve("memory", Value::Null).unwrap().name(), "memory");
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry().unwrap();
        assert!(registry.resolve("local", json!({})).is_err());

        let dir = tempfile::TempDir::new().unwrap();
        let store = registry
            .resolve("local", json!({ "root": dir.path() }))
            .unwrap();
        assert_eq!(store.name(), "local");
    }
}
