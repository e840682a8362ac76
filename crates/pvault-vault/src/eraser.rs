//! Overwrite-then-delete erasure of secure entries and blob files.
//!
//! This is best-effort risk reduction, not a forensic guarantee. Flash storage
//! remaps writes (wear leveling, copy-on-write filesystems, journaling), so the
//! bytes an overwrite targets may not be the bytes that held the data, and
//! keychain backends may keep their own history. What it does guarantee: after
//! a successful wipe the entry or file is gone from the vault's view.
//!
//! Pass order for each target:
//! ```text
//! random_passes × CSPRNG data (≥ original length)
//! 1 × all-zero pattern (same length)
//! delete
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use pvault_core::{VaultError, VaultResult};
use pvault_crypto::CryptoProvider;
use pvault_secrets::SecureStorageProvider;
use zeroize::Zeroizing;

use crate::fs::BlobFs;

/// Entries shorter than this are padded up so the overwrite does not reveal
/// the original length exactly.
const MIN_ENTRY_OVERWRITE: usize = 32;

/// One item a wipe could not erase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeFailure {
    /// Entry name or blob path
    pub target: String,
    pub error: VaultError,
}

/// Summary of a [`SecureEraser::wipe_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipeReport {
    pub deleted_entries: usize,
    pub deleted_blobs: usize,
    pub failures: Vec<WipeFailure>,
}

impl WipeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `WipePartialFailure` when anything was left behind.
    pub fn partial_failure(&self) -> Option<VaultError> {
        (!self.failures.is_empty()).then(|| VaultError::WipePartialFailure {
            failed: self.failures.len(),
        })
    }

    pub fn merge(&mut self, other: WipeReport) {
        self.deleted_entries += other.deleted_entries;
        self.deleted_blobs += other.deleted_blobs;
        self.failures.extend(other.failures);
    }
}

#[derive(Clone)]
pub struct SecureEraser {
    storage: Arc<dyn SecureStorageProvider>,
    crypto: Arc<dyn CryptoProvider>,
    fs: Arc<dyn BlobFs>,
    random_passes: u32,
}

impl SecureEraser {
    pub fn new(
        storage: Arc<dyn SecureStorageProvider>,
        crypto: Arc<dyn CryptoProvider>,
        fs: Arc<dyn BlobFs>,
        random_passes: u32,
    ) -> Self {
        Self {
            storage,
            crypto,
            fs,
            random_passes: random_passes.max(1),
        }
    }

    /// Overwrite a secure entry with random data, then zeros, then delete it.
    /// An absent entry is simply deleted (a no-op for every provider).
    pub async fn wipe_entry(&self, name: &str) -> VaultResult<()> {
        if let Some(current) = self.storage.get(name).await? {
            let len = Zeroizing::new(current).len().max(MIN_ENTRY_OVERWRITE);
            for _ in 0..self.random_passes {
                let noise = self.random_text(len)?;
                self.storage.set(name, &noise).await?;
            }
            self.storage.set(name, &"\0".repeat(len)).await?;
        }
        self.storage.delete(name).await?;
        tracing::debug!(entry = name, "wiped secure entry");
        Ok(())
    }

    /// Overwrite a file in place with random data, then zeros, then remove it.
    /// A file that does not exist counts as already wiped.
    pub async fn wipe_blob_file(&self, path: &Path) -> VaultResult<()> {
        let len = match self.fs.file_len(path).await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(VaultError::read(path.display(), e)),
        };

        if len > 0 {
            for _ in 0..self.random_passes {
                let noise = Zeroizing::new(self.crypto.random_bytes(len)?);
                self.fs
                    .overwrite(path, &noise)
                    .await
                    .map_err(|e| VaultError::write(path.display(), e))?;
            }
            self.fs
                .overwrite(path, &vec![0u8; len])
                .await
                .map_err(|e| VaultError::write(path.display(), e))?;
        }

        match self.fs.remove(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::write(path.display(), e)),
        }
        tracing::debug!(path = %path.display(), bytes = len, "wiped blob file");
        Ok(())
    }

    /// Wipe every entry and file, continuing past individual failures.
    /// Never fails as a whole; inspect the report.
    pub async fn wipe_all(&self, entry_names: &[String], blob_paths: &[PathBuf]) -> WipeReport {
        let mut report = WipeReport::default();

        for name in entry_names {
            match self.wipe_entry(name).await {
                Ok(()) => report.deleted_entries += 1,
                Err(error) => {
                    tracing::warn!(entry = %name, "failed to wipe secure entry: {error}");
                    report.failures.push(WipeFailure {
                        target: name.clone(),
                        error,
                    });
                }
            }
        }

        for path in blob_paths {
            match self.wipe_blob_file(path).await {
                Ok(()) => report.deleted_blobs += 1,
                Err(error) => {
                    tracing::warn!(path = %path.display(), "failed to wipe blob file: {error}");
                    report.failures.push(WipeFailure {
                        target: path.display().to_string(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            entries = report.deleted_entries,
            blobs = report.deleted_blobs,
            failures = report.failures.len(),
            "wipe finished"
        );
        report
    }

    /// `len` characters of CSPRNG-backed text (entries are strings).
    fn random_text(&self, len: usize) -> VaultResult<Zeroizing<String>> {
        let bytes = Zeroizing::new(self.crypto.random_bytes(len)?);
        let mut text = Zeroizing::new(STANDARD_NO_PAD.encode(bytes.as_slice()));
        text.truncate(len);
        Ok(text)
    }
}
