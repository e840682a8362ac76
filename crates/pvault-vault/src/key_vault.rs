//! Master key lifecycle: creation, versioning, device binding, verification
//! and explicit upgrade.
//!
//! Secure entries written here:
//! ```text
//! encryption-key         base64 material of the current version
//! encryption-key.v<N>    base64 material retained per version
//! encryption-version     current version marker (decimal)
//! device-fingerprint     dfp-<hex> or env-<hex>
//! last-verified-at       unix seconds of the last good round trip
//! ```
//!
//! Creation writes the retained entry, then the version marker, then the
//! current key. Loading prefers the retained entry for the marker's version,
//! so a crash between any two writes leaves a consistent key/version pair.

use std::sync::{Arc, RwLock};

use pvault_core::types::{entries, now_epoch};
use pvault_core::{VaultError, VaultResult};
use pvault_crypto::{CryptoError, CryptoProvider, KeyMaterial, MasterKey};
use pvault_secrets::device::FINGERPRINT_RANDOM_BYTES;
use pvault_secrets::{environment_fingerprint, fingerprint_from_random, SecureStorageProvider};
use tokio::sync::Mutex;

use crate::singleflight::SingleFlight;

/// Result of [`KeyVault::check_and_upgrade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Stored version already at or above the target; nothing changed
    UpToDate { version: u32 },
    /// A fresh key was generated at the target version
    Upgraded { from: u32, to: u32 },
}

impl UpgradeOutcome {
    pub fn version(&self) -> u32 {
        match self {
            UpgradeOutcome::UpToDate { version } => *version,
            UpgradeOutcome::Upgraded { to, .. } => *to,
        }
    }
}

/// Raw entry access shared by the single-flight closures.
#[derive(Clone)]
struct KeyEntries {
    storage: Arc<dyn SecureStorageProvider>,
    crypto: Arc<dyn CryptoProvider>,
}

impl KeyEntries {
    async fn stored_version(&self) -> VaultResult<Option<u32>> {
        match self.storage.get(entries::ENCRYPTION_VERSION).await? {
            Some(raw) => raw.trim().parse::<u32>().map(Some).map_err(|_| {
                VaultError::KeyUnavailable(format!("version marker is not a number: {raw:?}"))
            }),
            None => Ok(None),
        }
    }

    async fn material(&self, entry: &str) -> VaultResult<Option<KeyMaterial>> {
        match self.storage.get(entry).await? {
            Some(encoded) => KeyMaterial::from_base64(&encoded)
                .map(Some)
                .map_err(|e| VaultError::KeyUnavailable(format!("{entry}: {e}"))),
            None => Ok(None),
        }
    }

    async fn fingerprint(&self) -> VaultResult<String> {
        if let Some(existing) = self.storage.get(entries::DEVICE_FINGERPRINT).await? {
            return Ok(existing);
        }

        let fingerprint = match self.crypto.random_bytes(FINGERPRINT_RANDOM_BYTES) {
            Ok(bytes) => fingerprint_from_random(&bytes),
            Err(CryptoError::EntropyUnavailable(reason)) => {
                tracing::warn!("RNG unavailable for device fingerprint ({reason}), using environment signals");
                environment_fingerprint()
            }
            Err(e) => return Err(e.into()),
        };
        self.storage
            .set(entries::DEVICE_FINGERPRINT, &fingerprint)
            .await?;
        tracing::info!("generated device fingerprint");
        Ok(fingerprint)
    }

    /// Persist `material` as version `version` and make it current.
    async fn install(&self, material: &KeyMaterial, version: u32) -> VaultResult<()> {
        let encoded = material.to_base64();
        self.storage
            .set(&entries::retained_key(version), &encoded)
            .await?;
        self.storage
            .set(entries::ENCRYPTION_VERSION, &version.to_string())
            .await?;
        self.storage.set(entries::ENCRYPTION_KEY, &encoded).await
    }

    async fn load_or_create(
        &self,
        fingerprints: SingleFlight<(), String>,
        target_version: u32,
    ) -> VaultResult<MasterKey> {
        let fingerprint = {
            let this = self.clone();
            fingerprints
                .run((), move || async move { this.fingerprint().await })
                .await?
        };

        if let Some(version) = self.stored_version().await? {
            let material = match self.material(&entries::retained_key(version)).await? {
                Some(material) => material,
                None => self.material(entries::ENCRYPTION_KEY).await?.ok_or_else(|| {
                    VaultError::KeyUnavailable(format!(
                        "version marker {version} present but no key material stored"
                    ))
                })?,
            };
            return Ok(MasterKey {
                material,
                version,
                device_fingerprint: fingerprint,
            });
        }

        if let Some(material) = self.material(entries::ENCRYPTION_KEY).await? {
            // key without marker: written before version markers existed
            tracing::warn!("master key has no version marker, recording it as version 1");
            self.install(&material, 1).await?;
            return Ok(MasterKey {
                material,
                version: 1,
                device_fingerprint: fingerprint,
            });
        }

        let material = self.crypto.generate_key()?;
        self.install(&material, target_version).await?;
        tracing::info!(version = target_version, "created master key");
        Ok(MasterKey {
            material,
            version: target_version,
            device_fingerprint: fingerprint,
        })
    }
}

/// Owns the device master key. One per vault; share behind an `Arc`.
pub struct KeyVault {
    entries: KeyEntries,
    target_version: u32,
    key_flight: SingleFlight<(), MasterKey>,
    fingerprint_flight: SingleFlight<(), String>,
    current: RwLock<Option<MasterKey>>,
    upgrade_lock: Mutex<()>,
}

impl KeyVault {
    /// `target_version` is the version a brand new key is created at.
    pub fn new(
        storage: Arc<dyn SecureStorageProvider>,
        crypto: Arc<dyn CryptoProvider>,
        target_version: u32,
    ) -> Self {
        Self {
            entries: KeyEntries { storage, crypto },
            target_version: target_version.max(1),
            key_flight: SingleFlight::new(),
            fingerprint_flight: SingleFlight::new(),
            current: RwLock::new(None),
            upgrade_lock: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn SecureStorageProvider> {
        &self.entries.storage
    }

    /// Return the current master key, creating it on first use.
    ///
    /// Concurrent first-run callers all await the same creation, so exactly
    /// one key is ever generated.
    pub async fn ensure_key(&self) -> VaultResult<MasterKey> {
        if let Some(key) = self.cached() {
            return Ok(key);
        }

        let entries = self.entries.clone();
        let fingerprints = self.fingerprint_flight.clone();
        let target = self.target_version;
        let key = self
            .key_flight
            .run((), move || async move {
                entries.load_or_create(fingerprints, target).await
            })
            .await?;

        self.remember(&key);
        Ok(key)
    }

    /// Whether a master key or its version marker is already stored, without
    /// creating one.
    pub async fn has_stored_key(&self) -> VaultResult<bool> {
        if self.cached().is_some() {
            return Ok(true);
        }
        Ok(self.entries.stored_version().await?.is_some()
            || self.entries.storage.get(entries::ENCRYPTION_KEY).await?.is_some())
    }

    /// The device fingerprint, generated and persisted on first use.
    pub async fn get_device_fingerprint(&self) -> VaultResult<String> {
        let entries = self.entries.clone();
        self.fingerprint_flight
            .run((), move || async move { entries.fingerprint().await })
            .await
    }

    /// Key material for a blob sealed under `version`.
    ///
    /// Older versions are served from their retained entry; once that is gone
    /// the blob needs migration and decrypt fails with `MigrationRequired`.
    pub async fn key_for_version(&self, version: u32) -> VaultResult<KeyMaterial> {
        let current = self.ensure_key().await?;
        if version == current.version {
            return Ok(current.material);
        }
        if version > current.version {
            return Err(VaultError::KeyUnavailable(format!(
                "blob sealed under version {version}, newer than current {}",
                current.version
            )));
        }
        self.entries
            .material(&entries::retained_key(version))
            .await?
            .ok_or(VaultError::MigrationRequired {
                blob_version: version,
                current_version: current.version,
            })
    }

    /// Bring the stored key up to `target_version`.
    ///
    /// Never lowers the version. An upgrade generates a fresh key; the previous
    /// version stays retained until the controller has re-encrypted the blobs
    /// that reference it and retires it.
    pub async fn check_and_upgrade(&self, target_version: u32) -> VaultResult<UpgradeOutcome> {
        let _upgrade = self.upgrade_lock.lock().await;
        let current = self.ensure_key().await?;
        if current.version >= target_version {
            tracing::debug!(
                version = current.version,
                target = target_version,
                "encryption version up to date"
            );
            return Ok(UpgradeOutcome::UpToDate {
                version: current.version,
            });
        }

        let material = self.entries.crypto.generate_key()?;
        self.entries.install(&material, target_version).await?;
        self.remember(&MasterKey {
            material,
            version: target_version,
            device_fingerprint: current.device_fingerprint,
        });
        tracing::info!(
            from = current.version,
            to = target_version,
            "upgraded master key"
        );
        Ok(UpgradeOutcome::Upgraded {
            from: current.version,
            to: target_version,
        })
    }

    /// Versions below the current one whose key material is still retained.
    pub async fn retained_versions(&self) -> VaultResult<Vec<u32>> {
        let current = self.ensure_key().await?;
        let mut retained = Vec::new();
        for version in 1..current.version {
            if self
                .entries
                .storage
                .get(&entries::retained_key(version))
                .await?
                .is_some()
            {
                retained.push(version);
            }
        }
        Ok(retained)
    }

    /// Every secure entry the vault may have written, for a full wipe.
    ///
    /// Works without a readable key: the version range comes from the marker
    /// when it parses, otherwise from the configured target.
    pub async fn known_entry_names(&self) -> Vec<String> {
        let marker = self.entries.stored_version().await.ok().flatten();
        let highest = marker.unwrap_or(0).max(self.target_version);

        let mut names: Vec<String> = [
            entries::ENCRYPTION_KEY,
            entries::ENCRYPTION_VERSION,
            entries::DEVICE_FINGERPRINT,
            entries::LAST_VERIFIED_AT,
            entries::VERIFY_PROBE,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        names.extend((1..=highest).map(entries::retained_key));
        names
    }

    /// Round-trip check of the secure storage: write a throwaway entry, read
    /// it back, compare, delete it, and record the time. Never fails; any
    /// mismatch or I/O error yields `false`.
    pub async fn verify(&self) -> bool {
        let probe = match self.entries.crypto.random_bytes(16) {
            Ok(bytes) => fingerprint_from_random(&bytes),
            Err(_) => format!("probe-{}", now_epoch()),
        };
        let storage = &self.entries.storage;

        if let Err(e) = storage.set(entries::VERIFY_PROBE, &probe).await {
            tracing::warn!("verify: probe write failed: {e}");
            return false;
        }
        let matched = match storage.get(entries::VERIFY_PROBE).await {
            Ok(Some(read_back)) => read_back == probe,
            Ok(None) => {
                tracing::warn!("verify: probe entry missing after write");
                false
            }
            Err(e) => {
                tracing::warn!("verify: probe read failed: {e}");
                false
            }
        };
        if let Err(e) = storage.delete(entries::VERIFY_PROBE).await {
            tracing::warn!("verify: probe delete failed: {e}");
            return false;
        }
        if !matched {
            tracing::warn!("verify: probe value mismatch");
            return false;
        }

        if let Err(e) = storage
            .set(entries::LAST_VERIFIED_AT, &now_epoch().to_string())
            .await
        {
            tracing::warn!("verify: could not record verification time: {e}");
            return false;
        }
        true
    }

    /// Timestamp of the last successful [`verify`](Self::verify).
    pub async fn last_verified_at(&self) -> VaultResult<Option<u64>> {
        Ok(self
            .entries
            .storage
            .get(entries::LAST_VERIFIED_AT)
            .await?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    /// Forget the cached key (after a wipe, the next `ensure_key` reloads or
    /// recreates it).
    pub fn reset(&self) {
        *self.current.write().expect("key cache lock poisoned") = None;
    }

    /// Version of the cached key, if one has been loaded.
    pub fn current_version(&self) -> Option<u32> {
        self.current
            .read()
            .expect("key cache lock poisoned")
            .as_ref()
            .map(|k| k.version)
    }

    fn cached(&self) -> Option<MasterKey> {
        self.current.read().expect("key cache lock poisoned").clone()
    }

    /// Cache `key` unless a newer version is already cached.
    fn remember(&self, key: &MasterKey) {
        let mut current = self.current.write().expect("key cache lock poisoned");
        if current.as_ref().map_or(true, |k| k.version <= key.version) {
            *current = Some(key.clone());
        }
    }
}
