//! VaultController: the only component the rest of the application talks to.
//!
//! State machine:
//! ```text
//! Uninitialized ──initialize──▶ Initializing ──ok──▶ Ready
//!       ▲                            │err                │
//!       │◀───────────────────────────┘                   ├─verify=false─▶ VerifyFailed ─initialize─▶ …
//!       │                                                │
//!       └──── re-bootstrap ◀── Wiped ◀── WipePending ◀───┘ wipe_all
//! ```
//!
//! Lock order is gate, then catalog. Public operations enter the gate once and
//! use the blob store's ungated internals from there on.
//!
//! A wipe runs on its own task, so dropping the caller's future does not stop
//! it half way through the erase list.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use pvault_core::config::StorageConfig;
use pvault_core::types::{entries, now_epoch};
use pvault_core::{
    EncryptedBlob, EphemeralDecryptedFile, PhotoMetadata, PvaultConfig, VaultError, VaultResult,
    VaultState,
};
use pvault_crypto::{CryptoProvider, SystemCrypto};
use pvault_secrets::SecureStorageProvider;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::app_state::{AppState, AppStateStore, PhotoRecord};
use crate::blob_store::EncryptedBlobStore;
use crate::eraser::{SecureEraser, WipeFailure, WipeReport};
use crate::export::ExportSnapshot;
use crate::fs::{BlobFs, LocalFs};
use crate::gate::VaultGate;
use crate::key_vault::{KeyVault, UpgradeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultPhase {
    Uninitialized,
    Initializing,
    Ready,
    VerifyFailed,
    WipePending,
    Wiped,
}

impl std::fmt::Display for VaultPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VaultPhase::Uninitialized => "uninitialized",
            VaultPhase::Initializing => "initializing",
            VaultPhase::Ready => "ready",
            VaultPhase::VerifyFailed => "verify_failed",
            VaultPhase::WipePending => "wipe_pending",
            VaultPhase::Wiped => "wiped",
        };
        f.write_str(name)
    }
}

/// App lifecycle signals that trigger an ephemeral cache sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ViewerClosed,
    Background,
    /// Re-sweep in case a background sweep was interrupted
    Foreground,
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultStatus {
    pub phase: VaultPhase,
    pub vault_state: VaultState,
    pub photo_count: usize,
    pub storage_backend: &'static str,
    /// Version of the loaded master key, if any
    pub key_version: Option<u32>,
}

/// Outcome of re-encrypting the catalog after a key upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub reencrypted: usize,
    /// Blobs left on their old key version (their key stays retained)
    pub failed: usize,
    /// Key versions wiped because nothing references them any more
    pub retired: Vec<u32>,
}

/// Result of authenticating every catalogued blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub authenticated: usize,
    pub failures: Vec<WipeFailure>,
}

/// Where the controller keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    pub blob_dir: PathBuf,
    pub ephemeral_dir: PathBuf,
    pub state_file: PathBuf,
}

impl VaultPaths {
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self {
            blob_dir: storage.blob_dir(),
            ephemeral_dir: storage.ephemeral_dir(),
            state_file: storage.state_file(),
        }
    }

    /// Everything under one root: `blobs/`, `ephemeral/`, `state.json`.
    pub fn under(root: &Path) -> Self {
        Self {
            blob_dir: root.join("blobs"),
            ephemeral_dir: root.join("ephemeral"),
            state_file: root.join("state.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultOptions {
    /// Encryption version targeted on initialization
    pub target_version: u32,
    /// CSPRNG overwrite passes per wiped item
    pub random_passes: u32,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            target_version: 1,
            random_passes: 1,
        }
    }
}

/// Cheap to clone; clones share one vault.
#[derive(Clone)]
pub struct VaultController {
    keys: Arc<KeyVault>,
    blobs: Arc<EncryptedBlobStore>,
    eraser: SecureEraser,
    state_store: AppStateStore,
    gate: Arc<VaultGate>,
    catalog: Arc<Mutex<AppState>>,
    phase: Arc<StdMutex<VaultPhase>>,
    init_lock: Arc<Mutex<()>>,
    target_version: u32,
    storage_backend: &'static str,
}

impl VaultController {
    /// Wire up a controller from its injected dependencies. Nothing is read
    /// or written until [`initialize`](Self::initialize).
    pub fn new(
        storage: Arc<dyn SecureStorageProvider>,
        crypto: Arc<dyn CryptoProvider>,
        fs: Arc<dyn BlobFs>,
        paths: VaultPaths,
        options: VaultOptions,
    ) -> Self {
        let gate = Arc::new(VaultGate::new());
        let keys = Arc::new(KeyVault::new(
            storage.clone(),
            crypto.clone(),
            options.target_version,
        ));
        let blobs = Arc::new(EncryptedBlobStore::new(
            keys.clone(),
            crypto.clone(),
            fs.clone(),
            paths.blob_dir,
            paths.ephemeral_dir,
            gate.clone(),
        ));
        let storage_backend = storage.backend();
        let eraser = SecureEraser::new(storage, crypto, fs.clone(), options.random_passes);

        Self {
            keys,
            blobs,
            eraser,
            state_store: AppStateStore::new(fs, paths.state_file),
            gate,
            catalog: Arc::new(Mutex::new(AppState::default())),
            phase: Arc::new(StdMutex::new(VaultPhase::Uninitialized)),
            init_lock: Arc::new(Mutex::new(())),
            target_version: options.target_version.max(1),
            storage_backend,
        }
    }

    /// Production wiring: storage chosen by config, OS RNG, local filesystem.
    pub async fn from_config(config: &PvaultConfig) -> VaultResult<Self> {
        let storage = pvault_secrets::open_storage(config).await?;
        Ok(Self::new(
            storage,
            Arc::new(SystemCrypto),
            Arc::new(LocalFs),
            VaultPaths::from_storage(&config.storage),
            VaultOptions {
                target_version: config.crypto.target_version,
                random_passes: config.erase.random_passes,
            },
        ))
    }

    pub fn phase(&self) -> VaultPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    pub fn keys(&self) -> &Arc<KeyVault> {
        &self.keys
    }

    /// Direct access for flows that talk to the blob store themselves (the
    /// viewer, a user-triggered cache clear).
    pub fn blobs(&self) -> &Arc<EncryptedBlobStore> {
        &self.blobs
    }

    /// Load state, ensure the master key and bring it up to the target version.
    ///
    /// Idempotent once `Ready`. Also the recovery path out of `VerifyFailed`.
    pub async fn initialize(&self) -> VaultResult<()> {
        let _op = self.gate.enter().await?;
        let _init = self.init_lock.lock().await;
        if self.phase() == VaultPhase::Ready {
            return Ok(());
        }

        self.set_phase(VaultPhase::Initializing);
        let mut catalog = self.catalog.lock().await;
        match self.bootstrap(&mut catalog, false).await {
            Ok(()) => {
                self.set_phase(VaultPhase::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!("vault initialization failed: {e}");
                self.set_phase(VaultPhase::Uninitialized);
                Err(e)
            }
        }
    }

    /// Round-trip check of the secure storage. `false` moves the vault to
    /// `VerifyFailed`; only a fresh `initialize` recovers from there.
    pub async fn verify(&self) -> VaultResult<bool> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready, VaultPhase::VerifyFailed])?;

        if !self.keys.verify().await {
            self.set_phase(VaultPhase::VerifyFailed);
            return Ok(false);
        }

        let mut catalog = self.catalog.lock().await;
        catalog.vault.last_verified_at = Some(now_epoch());
        self.state_store.save(&catalog).await?;
        tracing::info!("vault verification passed");
        Ok(true)
    }

    /// Authenticate every catalogued blob without writing plaintext anywhere.
    pub async fn audit_photos(&self) -> VaultResult<AuditReport> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready])?;
        let photos = self.catalog.lock().await.photos.clone();

        let mut report = AuditReport::default();
        for record in photos {
            match self.blobs.authenticate(&record.blob).await {
                Ok(()) => report.authenticated += 1,
                Err(error) => {
                    tracing::warn!(blob_id = %record.id(), "photo failed audit: {error}");
                    report.failures.push(WipeFailure {
                        target: record.blob.id.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Explicitly move to a new encryption version: new key, re-encrypted
    /// catalog, superseded keys retired.
    pub async fn upgrade(&self, target_version: u32) -> VaultResult<UpgradeOutcome> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready])?;

        let mut catalog = self.catalog.lock().await;
        let outcome = self.keys.check_and_upgrade(target_version).await?;
        let summary = self.migrate_catalog(&mut catalog).await?;
        catalog.vault.raise_encryption_version(outcome.version());
        self.state_store.save(&catalog).await?;

        tracing::info!(
            version = outcome.version(),
            reencrypted = summary.reencrypted,
            failed = summary.failed,
            retired = ?summary.retired,
            "upgrade complete"
        );
        Ok(outcome)
    }

    /// Encrypt a captured photo and add it to the catalog.
    pub async fn capture_photo(
        &self,
        plaintext: &[u8],
        mut metadata: PhotoMetadata,
    ) -> VaultResult<PhotoRecord> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready])?;

        if metadata.captured_at == 0 {
            metadata.captured_at = now_epoch();
        }
        let blob = self.blobs.seal(plaintext, &metadata).await?;
        let record = PhotoRecord { blob, metadata };

        let mut catalog = self.catalog.lock().await;
        catalog.photos.push(record.clone());
        if let Err(e) = self.state_store.save(&catalog).await {
            catalog.photos.pop();
            if let Err(cleanup) = self.blobs.remove_file(&record.blob).await {
                tracing::warn!(blob_id = %record.id(), "uncatalogued blob left on disk: {cleanup}");
            }
            return Err(e);
        }
        tracing::info!(blob_id = %record.id(), category = %record.metadata.category, "photo captured");
        Ok(record)
    }

    /// Decrypt a catalogued photo into the ephemeral cache for viewing.
    pub async fn view_photo(&self, id: &str) -> VaultResult<EphemeralDecryptedFile> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready])?;
        let blob = self.lookup(id).await?;
        self.blobs.view(&blob).await
    }

    /// Remove a photo from the catalog and delete its ciphertext; `secure`
    /// overwrites the file before removing it.
    pub async fn delete_photo(&self, id: &str, secure: bool) -> VaultResult<()> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready])?;

        let mut catalog = self.catalog.lock().await;
        let record = catalog
            .take_photo(id)
            .ok_or_else(|| VaultError::NotFound(format!("photo {id}")))?;

        let removed = if secure {
            self.eraser.wipe_blob_file(&record.blob.ciphertext_path).await
        } else {
            self.blobs.remove_file(&record.blob).await
        };
        if let Err(e) = removed {
            catalog.photos.push(record);
            return Err(e);
        }

        // state.json still lists the photo; keep memory in step with it
        if let Err(e) = self.state_store.save(&catalog).await {
            tracing::warn!(blob_id = id, "blob removed but catalog not saved: {e}");
            catalog.photos.push(record);
            return Err(e);
        }
        tracing::info!(blob_id = id, secure, "photo deleted");
        Ok(())
    }

    pub async fn list_photos(&self) -> VaultResult<Vec<PhotoRecord>> {
        self.require(&[VaultPhase::Ready, VaultPhase::VerifyFailed])?;
        Ok(self.catalog.lock().await.photos.clone())
    }

    /// Portable snapshot of non-secret state and photo metadata.
    pub async fn export_user_data(&self) -> VaultResult<ExportSnapshot> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready, VaultPhase::VerifyFailed])?;
        let catalog = self.catalog.lock().await;
        Ok(ExportSnapshot::from_state(&catalog))
    }

    /// Erase every secure entry and blob file, clear app state, then
    /// re-bootstrap a fresh vault.
    ///
    /// Works in any phase, including a vault that failed to initialize.
    /// Not cancellable: the erase runs on a spawned task and finishes even if
    /// this future is dropped. Individual failures are collected in the
    /// report. Concurrent operations are rejected with `VaultBusy` until it
    /// finishes.
    pub async fn wipe_all(&self) -> VaultResult<WipeReport> {
        let this = self.clone();
        tokio::spawn(async move { this.run_wipe().await })
            .await
            .map_err(|e| VaultError::InvalidState(format!("wipe task failed: {e}")))?
    }

    async fn run_wipe(&self) -> VaultResult<WipeReport> {
        let _wipe = self.gate.begin_wipe().await?;
        self.set_phase(VaultPhase::WipePending);
        let mut catalog = self.catalog.lock().await;

        let mut report = WipeReport::default();
        self.wipe_ephemeral(&mut report).await;

        let entry_names = self.keys.known_entry_names().await;
        let mut blob_paths: Vec<PathBuf> = catalog
            .photos
            .iter()
            .map(|p| p.blob.ciphertext_path.clone())
            .collect();
        if catalog.photos.is_empty() {
            // never initialized in this process; the catalog may still be on disk
            match self.state_store.load().await {
                Ok(stored) => {
                    blob_paths.extend(stored.photos.into_iter().map(|p| p.blob.ciphertext_path))
                }
                Err(e) => tracing::warn!("could not read catalog before wipe: {e}"),
            }
        }
        match self.blobs.blob_files().await {
            Ok(on_disk) => blob_paths.extend(on_disk),
            Err(e) => tracing::warn!("could not list blob directory: {e}"),
        }
        blob_paths.sort();
        blob_paths.dedup();

        report.merge(self.eraser.wipe_all(&entry_names, &blob_paths).await);

        if let Err(error) = self.state_store.clear().await {
            tracing::warn!("failed to clear app state: {error}");
            report.failures.push(WipeFailure {
                target: self.state_store.path().display().to_string(),
                error,
            });
        }
        *catalog = AppState::default();
        self.keys.reset();
        self.set_phase(VaultPhase::Wiped);

        self.set_phase(VaultPhase::Uninitialized);
        match self.bootstrap(&mut catalog, true).await {
            Ok(()) => self.set_phase(VaultPhase::Ready),
            Err(e) => tracing::error!("re-bootstrap after wipe failed: {e}"),
        }
        Ok(report)
    }

    /// Overwrite decrypted views like any other plaintext, then sweep what is
    /// left (partial temp files).
    async fn wipe_ephemeral(&self, report: &mut WipeReport) {
        let views = match self.blobs.ephemeral().files().await {
            Ok(views) => views,
            Err(e) => {
                tracing::warn!("could not list ephemeral cache before wipe: {e}");
                Vec::new()
            }
        };
        for view in views {
            if let Err(error) = self.eraser.wipe_blob_file(&view).await {
                tracing::warn!(path = %view.display(), "failed to wipe decrypted view: {error}");
                report.failures.push(WipeFailure {
                    target: view.display().to_string(),
                    error,
                });
            }
        }
        if let Err(e) = self.blobs.cleanup_ephemeral().await {
            tracing::warn!("ephemeral sweep during wipe failed: {e}");
        }
    }

    /// Record the user's consent choice. Consent does not gate any vault
    /// capability.
    pub async fn set_consent(&self, granted: bool) -> VaultResult<()> {
        let _op = self.gate.enter().await?;
        self.require(&[VaultPhase::Ready, VaultPhase::VerifyFailed])?;
        let mut catalog = self.catalog.lock().await;
        catalog.vault.consent_granted = granted;
        self.state_store.save(&catalog).await?;
        tracing::info!(granted, "consent updated");
        Ok(())
    }

    /// Sweep the ephemeral cache in the background. Failures are logged; the
    /// handle is returned for callers that want to wait for the sweep.
    pub fn on_lifecycle(&self, event: LifecycleEvent) -> JoinHandle<()> {
        let blobs = self.blobs.clone();
        tokio::spawn(async move {
            match blobs.cleanup_ephemeral().await {
                Ok(removed) => tracing::debug!(?event, removed, "ephemeral cache swept"),
                Err(e) => tracing::warn!(?event, "ephemeral cleanup failed: {e}"),
            }
        })
    }

    pub async fn status(&self) -> VaultStatus {
        let catalog = self.catalog.lock().await;
        VaultStatus {
            phase: self.phase(),
            vault_state: catalog.vault.clone(),
            photo_count: catalog.photos.len(),
            storage_backend: self.storage_backend,
            key_version: self.keys.current_version(),
        }
    }

    /// `fresh` is set only right after a wipe, where creating a new key is
    /// the point. Otherwise a missing key over existing photos is an error:
    /// a replacement key could never open them.
    async fn bootstrap(&self, catalog: &mut AppState, fresh: bool) -> VaultResult<()> {
        // nothing decrypted survives a restart
        match self.blobs.cleanup_ephemeral().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "removed stale ephemeral files"),
            Err(e) => tracing::warn!("startup ephemeral sweep failed: {e}"),
        }

        *catalog = self.state_store.load().await?;
        if !fresh && !self.keys.has_stored_key().await? {
            let blob_files = self.blobs.blob_files().await?.len();
            if catalog.vault.initialized || !catalog.photos.is_empty() || blob_files > 0 {
                tracing::error!(
                    photos = catalog.photos.len(),
                    blob_files,
                    "master key missing from secure storage; refusing to create a new one"
                );
                return Err(VaultError::KeyUnavailable(format!(
                    "master key missing but the vault holds {} photo(s) and {blob_files} blob file(s); \
                     restore the key or wipe the vault",
                    catalog.photos.len()
                )));
            }
        }
        let key = self.keys.ensure_key().await?;
        let outcome = self.keys.check_and_upgrade(self.target_version).await?;
        let summary = self.migrate_catalog(catalog).await?;

        catalog.vault.initialized = true;
        catalog.vault.raise_encryption_version(key.version);
        catalog.vault.raise_encryption_version(outcome.version());
        catalog.vault.last_verified_at = self.keys.last_verified_at().await.unwrap_or(None);
        self.state_store.save(catalog).await?;

        tracing::info!(
            version = outcome.version(),
            photos = catalog.photos.len(),
            reencrypted = summary.reencrypted,
            backend = self.storage_backend,
            "vault ready"
        );
        Ok(())
    }

    /// Re-encrypt blobs sealed under older versions, persist the catalog, then
    /// remove old ciphertext and retire keys nothing references.
    async fn migrate_catalog(&self, catalog: &mut AppState) -> VaultResult<MigrationSummary> {
        let current = self.keys.ensure_key().await?.version;
        let mut summary = MigrationSummary::default();
        let mut superseded: Vec<EncryptedBlob> = Vec::new();

        let stale: Vec<EncryptedBlob> = catalog
            .photos
            .iter()
            .filter(|p| p.blob.key_version < current)
            .map(|p| p.blob.clone())
            .collect();
        for blob in stale {
            match self.blobs.reencrypt(&blob).await {
                Ok(resealed) => {
                    catalog.replace_blob(resealed);
                    superseded.push(blob);
                    summary.reencrypted += 1;
                }
                Err(e) => {
                    tracing::warn!(blob_id = %blob.id, version = blob.key_version, "re-encryption failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        if summary.reencrypted > 0 {
            // the new descriptors must be durable before old files and keys go
            self.state_store.save(catalog).await?;
            for blob in &superseded {
                if let Err(e) = self.blobs.remove_file(blob).await {
                    tracing::warn!(blob_id = %blob.id, "could not remove superseded ciphertext: {e}");
                }
            }
        }

        // uncatalogued blobs (sealed through the blob store directly) count too
        let mut referenced: BTreeSet<u32> = catalog.referenced_versions().into_iter().collect();
        match self.blobs.versions_on_disk().await {
            Ok(on_disk) => referenced.extend(on_disk),
            Err(e) => {
                tracing::warn!("could not list blob files, keeping every retained key: {e}");
                return Ok(summary);
            }
        }
        for version in self.keys.retained_versions().await? {
            if referenced.contains(&version) {
                continue;
            }
            match self.eraser.wipe_entry(&entries::retained_key(version)).await {
                Ok(()) => summary.retired.push(version),
                Err(e) => tracing::warn!(version, "could not retire old key: {e}"),
            }
        }
        Ok(summary)
    }

    async fn lookup(&self, id: &str) -> VaultResult<EncryptedBlob> {
        self.catalog
            .lock()
            .await
            .photo(id)
            .map(|p| p.blob.clone())
            .ok_or_else(|| VaultError::NotFound(format!("photo {id}")))
    }

    fn require(&self, allowed: &[VaultPhase]) -> VaultResult<()> {
        let phase = self.phase();
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(VaultError::InvalidState(format!("vault is {phase}")))
        }
    }

    fn set_phase(&self, next: VaultPhase) {
        let mut phase = self.phase.lock().expect("phase lock poisoned");
        if *phase != next {
            tracing::info!(from = %*phase, to = %next, "vault phase");
            *phase = next;
        }
    }
}
