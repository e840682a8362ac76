//! Platform keychain provider.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Windows: Credential Manager (DPAPI)
//! - Linux: kernel keyutils
//!
//! Keyutils entries live in the session keyring and are gone after logout or
//! reboot, so on Linux the keychain is not durable enough to hold the only
//! copy of a master key. See [`KeychainStorage::DURABLE`].
//!
//! `keyring` calls block, so each one runs on the blocking pool.

use async_trait::async_trait;
use pvault_core::{VaultError, VaultResult};
use secrecy::{ExposeSecret, SecretString};

use crate::SecureStorageProvider;

const PROBE_ENTRY: &str = "__pvault_probe__";

#[derive(Debug, Clone)]
pub struct KeychainStorage {
    service: String,
}

impl KeychainStorage {
    /// Whether entries survive logout and reboot on this platform.
    pub const DURABLE: bool = !cfg!(target_os = "linux");

    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// Check the keychain actually accepts writes: set, read back and delete a
    /// probe entry. `Entry::new` alone succeeds even when no backend is usable.
    pub async fn probe(&self) -> bool {
        let probe_value = format!("probe-{}", pvault_core::types::now_epoch());
        let ok = match self.set(PROBE_ENTRY, &probe_value).await {
            Ok(()) => matches!(self.get(PROBE_ENTRY).await, Ok(Some(v)) if v == probe_value),
            Err(e) => {
                tracing::debug!("keychain probe failed: {e}");
                false
            }
        };
        let _ = self.delete(PROBE_ENTRY).await;
        ok
    }

    async fn with_entry<T, F>(&self, name: &str, op: F) -> VaultResult<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> VaultResult<T> + Send + 'static,
    {
        let service = self.service.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &name)
                .map_err(|e| VaultError::read(format!("keychain entry '{name}'"), e))?;
            op(entry)
        })
        .await
        .map_err(|e| VaultError::StorageRead(format!("keychain task failed: {e}")))?
    }
}

#[async_trait]
impl SecureStorageProvider for KeychainStorage {
    fn backend(&self) -> &'static str {
        "keychain"
    }

    async fn get(&self, name: &str) -> VaultResult<Option<String>> {
        let key_name = name.to_string();
        self.with_entry(name, move |entry| match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::read(format!("keychain get '{key_name}'"), e)),
        })
        .await
    }

    async fn set(&self, name: &str, value: &str) -> VaultResult<()> {
        let key_name = name.to_string();
        let secret = SecretString::from(value.to_string());
        self.with_entry(name, move |entry| {
            entry
                .set_password(secret.expose_secret())
                .map_err(|e| VaultError::write(format!("keychain store '{key_name}'"), e))
        })
        .await?;
        tracing::debug!(entry = name, "stored secret in platform keychain");
        Ok(())
    }

    async fn delete(&self, name: &str) -> VaultResult<()> {
        let key_name = name.to_string();
        self.with_entry(name, move |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VaultError::write(format!("keychain delete '{key_name}'"), e)),
        })
        .await?;
        tracing::debug!(entry = name, "deleted secret from platform keychain");
        Ok(())
    }
}
