//! Local filesystem key store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::store::{KeyStore, SlotMetadata};
use keywarden_common::{KeySlot, Result, SensitiveBytes};

const TMP_SUFFIX: &str = ".tmp";

/// Local filesystem key store.
///
/// Each slot is one file directly under the root directory. Writes go to a
/// temporary sibling first and are renamed into place.
pub struct LocalKeyStore {
    root: PathBuf,
}

impl LocalKeyStore {
    /// Create a store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    fn slot_path(&self, slot: &KeySlot) -> PathBuf {
        self.root.join(slot.as_str())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, slot: &KeySlot) -> Result<Option<SensitiveBytes>> {
        match fs::read(self.slot_path(slot)).await {
            Ok(data) => Ok(Some(SensitiveBytes::new(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, slot: &KeySlot, value: SensitiveBytes) -> Result<()> {
        let path = self.slot_path(slot);
        let tmp_path = self.root.join(format!("{}{}", slot.as_str(), TMP_SUFFIX));

        {
            let mut file = fs::File::create(&tmp_path).await?;
            restrict_permissions(&tmp_path).await?;
            file.write_all(value.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &path).await?;

        debug!(slot = %slot, "Wrote key slot");
        Ok(())
    }

    async fn delete(&self, slot: &KeySlot) -> Result<bool> {
        match fs::remove_file(self.slot_path(slot)).await {
            Ok(()) => {
                debug!(slot = %slot, "Deleted key slot");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<SlotMetadata>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut slots = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            // Files that are not valid slot names were not written by this store.
            let Ok(slot) = KeySlot::new(name) else {
                continue;
            };
            let modified: DateTime<Utc> = meta
                .modified()
                .map(|t| t.into())
                .unwrap_or_else(|_| Utc::now());
            slots.push(SlotMetadata {
                slot,
                size: meta.len(),
                modified,
            });
        }

        slots.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn slot(name: &str) -> KeySlot {
        KeySlot::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let store = LocalKeyStore::new(dir.path()).unwrap();

        store
            .put(&slot("device-keypair"), SensitiveBytes::new(b"pair".to_vec()))
            .await
            .unwrap();

        let value = store.get(&slot("device-keypair")).await.unwrap().unwrap();
        assert_eq!(value.as_bytes(), b"pair");
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = TempDir::new().unwrap();

        LocalKeyStore::new(dir.path())
            .unwrap()
            .put(&slot("a"), SensitiveBytes::new(vec![1, 2, 3]))
            .await
            .unwrap();

        let reopened = LocalKeyStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get(&slot("a")).await.unwrap().unwrap().as_bytes(),
            &[1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("keys");

        let store = LocalKeyStore::new(&root).unwrap();
        assert!(root.is_dir());
        assert!(store.get(&slot("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let dir = TempDir::new().unwrap();
        let store = LocalKeyStore::new(dir.path()).unwrap();

        store.put(&slot("b"), SensitiveBytes::new(vec![1])).await.unwrap();
        store.put(&slot("a"), SensitiveBytes::new(vec![1, 2])).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].slot, slot("a"));
        assert_eq!(listed[0].size, 2);

        assert!(store.delete(&slot("a")).await.unwrap());
        assert!(!store.delete(&slot("a")).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalKeyStore::new(dir.path()).unwrap();

        store.put(&slot("a"), SensitiveBytes::new(vec![1])).await.unwrap();

        assert!(!dir.path().join("a.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = LocalKeyStore::new(dir.path()).unwrap();
        store.put(&slot("a"), SensitiveBytes::new(vec![1])).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("a")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
