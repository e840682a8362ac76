//! Ephemeral cache for decrypted photos.
//!
//! A decrypted copy lives here only while a viewer shows it. The whole
//! directory is swept on viewer close, background, foreground, teardown and
//! at startup, so nothing outlives a session or a restart.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pvault_core::{EphemeralDecryptedFile, VaultError, VaultResult};

use crate::fs::BlobFs;

const VIEW_EXTENSION: &str = "view";

#[derive(Clone)]
pub struct EphemeralCache {
    fs: Arc<dyn BlobFs>,
    dir: PathBuf,
}

impl EphemeralCache {
    pub fn new(fs: Arc<dyn BlobFs>, dir: PathBuf) -> Self {
        Self { fs, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `plaintext` as the viewable copy of `blob_id`. The file appears
    /// atomically (temp + rename) so a viewer never sees a partial image.
    pub async fn write(&self, blob_id: &str, plaintext: &[u8]) -> VaultResult<EphemeralDecryptedFile> {
        self.fs
            .create_dir_all(&self.dir)
            .await
            .map_err(|e| VaultError::write(self.dir.display(), e))?;

        let path = self.dir.join(format!("{blob_id}.{VIEW_EXTENSION}"));
        let tmp = self.dir.join(format!(".{blob_id}.{VIEW_EXTENSION}.tmp"));
        self.fs
            .write(&tmp, plaintext)
            .await
            .map_err(|e| VaultError::write(tmp.display(), e))?;
        if let Err(e) = self.fs.rename(&tmp, &path).await {
            if let Err(cleanup) = self.fs.remove(&tmp).await {
                tracing::warn!(blob_id, path = %tmp.display(), "failed to remove partial view: {cleanup}");
            }
            return Err(VaultError::write(path.display(), e));
        }

        tracing::debug!(blob_id, path = %path.display(), "wrote ephemeral view");
        Ok(EphemeralDecryptedFile {
            blob_id: blob_id.to_string(),
            path,
            len: plaintext.len() as u64,
        })
    }

    /// Remove every file in the cache directory. Idempotent; an empty or
    /// missing directory removes nothing.
    ///
    /// Keeps going past individual failures and reports the first one after
    /// the sweep, so one stuck file does not shield the others.
    pub async fn clear(&self) -> VaultResult<usize> {
        let files = self
            .fs
            .list(&self.dir)
            .await
            .map_err(|e| VaultError::read(self.dir.display(), e))?;

        let mut removed = 0;
        let mut first_error = None;
        for file in files {
            match self.fs.remove(&file).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %file.display(), "failed to remove ephemeral file: {e}");
                    first_error.get_or_insert_with(|| VaultError::write(file.display(), e));
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "ephemeral cache cleared");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Paths currently in the cache.
    pub async fn files(&self) -> VaultResult<Vec<PathBuf>> {
        self.fs
            .list(&self.dir)
            .await
            .map_err(|e| VaultError::read(self.dir.display(), e))
    }
}
