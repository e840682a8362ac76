//! Ordinary (non-secret) app state: `VaultState` plus the photo catalog.
//!
//! Persisted as `state.json` with an atomic temp-then-rename write. Nothing in
//! here is key material; blob descriptors carry nonces and tags, which are
//! public by construction.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pvault_core::{EncryptedBlob, PhotoMetadata, VaultError, VaultResult, VaultState};
use serde::{Deserialize, Serialize};

use crate::fs::BlobFs;

/// Current layout version of `state.json`.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// A catalogued photo: its blob descriptor and plaintext metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub blob: EncryptedBlob,
    #[serde(default)]
    pub metadata: PhotoMetadata,
}

impl PhotoRecord {
    pub fn id(&self) -> &str {
        &self.blob.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub format_version: u32,
    pub vault: VaultState,
    pub photos: Vec<PhotoRecord>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            vault: VaultState::default(),
            photos: Vec::new(),
        }
    }
}

impl AppState {
    pub fn photo(&self, id: &str) -> Option<&PhotoRecord> {
        self.photos.iter().find(|p| p.id() == id)
    }

    /// Remove and return the record for `id`.
    pub fn take_photo(&mut self, id: &str) -> Option<PhotoRecord> {
        let index = self.photos.iter().position(|p| p.id() == id)?;
        Some(self.photos.remove(index))
    }

    /// Replace the descriptor of an existing record (after re-encryption).
    pub fn replace_blob(&mut self, blob: EncryptedBlob) -> bool {
        match self.photos.iter_mut().find(|p| p.blob.id == blob.id) {
            Some(record) => {
                record.blob = blob;
                true
            }
            None => false,
        }
    }

    /// Key versions still referenced by catalogued blobs.
    pub fn referenced_versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.photos.iter().map(|p| p.blob.key_version).collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }
}

/// Loads and saves [`AppState`] at a fixed path.
#[derive(Clone)]
pub struct AppStateStore {
    fs: Arc<dyn BlobFs>,
    path: PathBuf,
}

impl AppStateStore {
    pub fn new(fs: Arc<dyn BlobFs>, path: PathBuf) -> Self {
        Self { fs, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or a fresh default if none exists yet.
    pub async fn load(&self) -> VaultResult<AppState> {
        let raw = match self.fs.read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AppState::default()),
            Err(e) => return Err(VaultError::read(self.path.display(), e)),
        };

        let state: AppState = serde_json::from_slice(&raw)
            .map_err(|e| VaultError::read(self.path.display(), format!("parsing: {e}")))?;
        if state.format_version > STATE_FORMAT_VERSION {
            return Err(VaultError::InvalidState(format!(
                "{} has format version {}, this build understands up to {STATE_FORMAT_VERSION}",
                self.path.display(),
                state.format_version
            )));
        }
        Ok(state)
    }

    pub async fn save(&self, state: &AppState) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|e| VaultError::write(parent.display(), e))?;
        }

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| VaultError::write(self.path.display(), e))?;

        let tmp = self.path.with_extension("json.tmp");
        self.fs
            .write(&tmp, &json)
            .await
            .map_err(|e| VaultError::write(tmp.display(), e))?;
        self.fs
            .rename(&tmp, &self.path)
            .await
            .map_err(|e| VaultError::write(self.path.display(), e))
    }

    /// Delete the document. Missing is fine.
    pub async fn clear(&self) -> VaultResult<()> {
        match self.fs.remove(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::write(self.path.display(), e)),
        }
    }
}
