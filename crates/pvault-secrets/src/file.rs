//! Fallback secret storage for hosts without a usable keychain.
//!
//! Entries live in one JSON object on disk, owner-readable only (0600 on
//! unix). Every mutation is flushed with an atomic temp-then-rename write, so
//! a crash never leaves a half-written secrets file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pvault_core::{VaultError, VaultResult};
use tokio::sync::Mutex;
use zeroize::Zeroize;

use crate::SecureStorageProvider;

pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the secrets file at `path`.
    pub async fn open(path: &Path) -> VaultResult<Self> {
        let entries = match tokio::fs::read(path).await {
            Ok(mut raw) => {
                let parsed = serde_json::from_slice(&raw)
                    .map_err(|e| VaultError::read(path.display(), format!("parsing: {e}")));
                raw.zeroize();
                parsed?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(VaultError::read(path.display(), e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &BTreeMap<String, String>) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::write(parent.display(), e))?;
        }

        let mut json =
            serde_json::to_vec_pretty(entries).map_err(|e| VaultError::write("secrets", e))?;

        let tmp_path = self.path.with_extension("tmp");
        let result = write_private(&tmp_path, &json).await;
        json.zeroize();
        result.map_err(|e| VaultError::write(tmp_path.display(), e))?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| VaultError::write(self.path.display(), e))
    }
}

async fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

#[async_trait]
impl SecureStorageProvider for FileStorage {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get(&self, name: &str) -> VaultResult<Option<String>> {
        Ok(self.entries.lock().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> VaultResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some(mut previous) = entries.insert(name.to_string(), value.to_string()) {
            previous.zeroize();
        }
        self.flush(&entries).await?;
        tracing::debug!(entry = name, "stored secret in file storage");
        Ok(())
    }

    async fn delete(&self, name: &str) -> VaultResult<()> {
        let mut entries = self.entries.lock().await;
        match entries.remove(name) {
            Some(mut previous) => {
                previous.zeroize();
                self.flush(&entries).await?;
                tracing::debug!(entry = name, "deleted secret from file storage");
            }
            None => tracing::debug!(entry = name, "delete of absent secret (no-op)"),
        }
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        for value in self.entries.get_mut().values_mut() {
            value.zeroize();
        }
    }
}
