//! pvault-secrets: secure key/value storage for master keys and device identity
//!
//! Two providers implement [`SecureStorageProvider`]:
//!   1. [`KeychainStorage`]: the platform credential store (preferred)
//!   2. [`FileStorage`]: an owner-only JSON file, used where no durable keychain exists
//!
//! [`open_storage`] picks one once at startup; callers only see the trait.

pub mod device;
pub mod file;
pub mod keychain;

pub use device::{environment_fingerprint, fingerprint_from_random};
pub use file::FileStorage;
pub use keychain::KeychainStorage;

use std::sync::Arc;

use async_trait::async_trait;
use pvault_core::config::{PvaultConfig, SecretsBackend};
use pvault_core::{VaultError, VaultResult};

/// Key/value persistence for small secrets. Values are strings; binary
/// material is stored base64-encoded by the caller.
#[async_trait]
pub trait SecureStorageProvider: Send + Sync {
    /// Short backend name for status output and logs.
    fn backend(&self) -> &'static str;

    async fn get(&self, name: &str) -> VaultResult<Option<String>>;

    async fn set(&self, name: &str, value: &str) -> VaultResult<()>;

    /// Delete an entry. Deleting an absent entry is not an error.
    async fn delete(&self, name: &str) -> VaultResult<()>;
}

/// Select and open the secure storage provider described by `config`.
///
/// `auto` probes the platform keychain with a real set/get/delete round trip
/// and falls back to the file provider if the probe fails. Where the keychain
/// does not outlive the session (Linux keyutils) `auto` goes straight to the
/// file provider.
pub async fn open_storage(config: &PvaultConfig) -> VaultResult<Arc<dyn SecureStorageProvider>> {
    let fallback_path = config.secrets.fallback_path(&config.storage);
    let service = config.secrets.service_name.clone();

    match config.secrets.backend {
        SecretsBackend::File => {
            let store = FileStorage::open(&fallback_path).await?;
            tracing::info!(path = %fallback_path.display(), "using file secret storage");
            Ok(Arc::new(store))
        }
        SecretsBackend::Keychain => {
            let store = KeychainStorage::new(&service);
            if !store.probe().await {
                return Err(VaultError::Config(
                    "secrets.backend = \"keychain\" but the platform keychain is unavailable"
                        .into(),
                ));
            }
            if !KeychainStorage::DURABLE {
                tracing::warn!(
                    service = %service,
                    "platform keychain is session-scoped; the master key is lost at logout or reboot"
                );
            }
            tracing::info!(service = %service, "using platform keychain");
            Ok(Arc::new(store))
        }
        SecretsBackend::Auto if !KeychainStorage::DURABLE => {
            tracing::info!(
                path = %fallback_path.display(),
                "platform keychain is session-scoped, using file secret storage"
            );
            Ok(Arc::new(FileStorage::open(&fallback_path).await?))
        }
        SecretsBackend::Auto => {
            let store = KeychainStorage::new(&service);
            if store.probe().await {
                tracing::info!(service = %service, "using platform keychain");
                return Ok(Arc::new(store));
            }
            tracing::warn!(
                path = %fallback_path.display(),
                "platform keychain unavailable, falling back to file secret storage"
            );
            Ok(Arc::new(FileStorage::open(&fallback_path).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_storage_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PvaultConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.secrets.backend = SecretsBackend::File;

        let store = open_storage(&config).await.unwrap();
        assert_eq!(store.backend(), "file");

        store.set("encryption-version", "1").await.unwrap();
        assert_eq!(
            store.get("encryption-version").await.unwrap().as_deref(),
            Some("1")
        );
        assert!(dir.path().join("secrets.json").exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_auto_uses_file_storage_on_linux() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PvaultConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.secrets.backend = SecretsBackend::Auto;

        let store = open_storage(&config).await.unwrap();
        assert_eq!(store.backend(), "file");
    }
}
