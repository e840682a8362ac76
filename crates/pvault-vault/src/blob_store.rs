//! Encrypted blob store: one AEAD-sealed file per photo.
//!
//! ```text
//! {blob_dir}/{id}.v{key_version}.blob   = ciphertext || tag
//! descriptor             = { id, nonce, auth_tag, key_version, ... }
//! ```
//!
//! The key version is part of the file name, so re-encryption writes a new
//! file and the old one stays valid until the catalog points elsewhere.
//!
//! Decrypts of the same blob id are coalesced: N concurrent viewers cost one
//! read, one AEAD open and one ephemeral file.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pvault_core::types::now_epoch;
use pvault_core::{EncryptedBlob, EphemeralDecryptedFile, PhotoMetadata, VaultError, VaultResult};
use pvault_crypto::{blob_aad, CryptoError, CryptoProvider, Sealed};
use zeroize::Zeroizing;

use crate::ephemeral::EphemeralCache;
use crate::fs::BlobFs;
use crate::gate::VaultGate;
use crate::key_vault::KeyVault;
use crate::singleflight::SingleFlight;

const BLOB_EXTENSION: &str = "blob";

/// Everything a decrypt needs, owned, so a coalesced decrypt can run as a
/// `'static` future.
#[derive(Clone)]
struct BlobContext {
    keys: Arc<KeyVault>,
    crypto: Arc<dyn CryptoProvider>,
    fs: Arc<dyn BlobFs>,
    blob_dir: PathBuf,
    ephemeral: EphemeralCache,
}

impl BlobContext {
    fn blob_path(&self, id: &str, key_version: u32) -> PathBuf {
        self.blob_dir.join(format!("{id}.v{key_version}.{BLOB_EXTENSION}"))
    }

    /// Seal `plaintext` under the current key as blob `id` and write it
    /// atomically to its blob path.
    async fn seal_as(&self, id: &str, plaintext: &[u8], created_at: u64) -> VaultResult<EncryptedBlob> {
        let key = self.keys.ensure_key().await?;
        let nonce = self.crypto.generate_nonce()?;
        let aad = blob_aad(key.version, id);
        let sealed = self
            .crypto
            .aead_encrypt(&key.material, &nonce, &aad, plaintext)?;

        self.fs
            .create_dir_all(&self.blob_dir)
            .await
            .map_err(|e| VaultError::write(self.blob_dir.display(), e))?;

        let path = self.blob_path(id, key.version);
        let tmp = path.with_extension("tmp");
        self.fs
            .write(&tmp, &sealed.to_bytes())
            .await
            .map_err(|e| VaultError::write(tmp.display(), e))?;
        if let Err(e) = self.fs.rename(&tmp, &path).await {
            if let Err(cleanup) = self.fs.remove(&tmp).await {
                tracing::warn!(blob_id = id, path = %tmp.display(), "failed to remove partial blob: {cleanup}");
            }
            return Err(VaultError::write(path.display(), e));
        }

        Ok(EncryptedBlob {
            id: id.to_string(),
            ciphertext_path: path,
            nonce,
            auth_tag: sealed.tag.to_vec(),
            key_version: key.version,
            plaintext_len: plaintext.len() as u64,
            created_at,
        })
    }

    /// Read, authenticate and decrypt a blob. Never yields bytes that failed
    /// authentication.
    async fn open(&self, blob: &EncryptedBlob) -> VaultResult<Zeroizing<Vec<u8>>> {
        let data = self
            .fs
            .read(&blob.ciphertext_path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => VaultError::NotFound(format!("blob {}", blob.id)),
                _ => VaultError::read(blob.ciphertext_path.display(), e),
            })?;
        let sealed = Sealed::from_bytes(&data)?;

        // the descriptor's tag copy must match the file; a swapped file fails here
        if blob.auth_tag.as_slice() != sealed.tag.as_slice() {
            tracing::warn!(blob_id = %blob.id, "descriptor tag does not match blob file");
            return Err(VaultError::Integrity);
        }

        let key = self.keys.key_for_version(blob.key_version).await?;
        let aad = blob_aad(blob.key_version, &blob.id);
        match self
            .crypto
            .aead_decrypt(&key, &blob.nonce, &aad, &sealed.ciphertext, &sealed.tag)
        {
            Ok(plaintext) => Ok(Zeroizing::new(plaintext)),
            Err(CryptoError::Integrity) => {
                tracing::warn!(blob_id = %blob.id, "blob failed authentication");
                Err(VaultError::Integrity)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn decrypt_to_ephemeral(&self, blob: &EncryptedBlob) -> VaultResult<EphemeralDecryptedFile> {
        let plaintext = self.open(blob).await?;
        self.ephemeral.write(&blob.id, &plaintext).await
    }
}

pub struct EncryptedBlobStore {
    ctx: BlobContext,
    gate: Arc<VaultGate>,
    decrypts: SingleFlight<String, EphemeralDecryptedFile>,
}

impl EncryptedBlobStore {
    pub fn new(
        keys: Arc<KeyVault>,
        crypto: Arc<dyn CryptoProvider>,
        fs: Arc<dyn BlobFs>,
        blob_dir: PathBuf,
        ephemeral_dir: PathBuf,
        gate: Arc<VaultGate>,
    ) -> Self {
        let ephemeral = EphemeralCache::new(fs.clone(), ephemeral_dir);
        Self {
            ctx: BlobContext {
                keys,
                crypto,
                fs,
                blob_dir,
                ephemeral,
            },
            gate,
            decrypts: SingleFlight::new(),
        }
    }

    pub fn blob_dir(&self) -> &Path {
        &self.ctx.blob_dir
    }

    pub fn ephemeral(&self) -> &EphemeralCache {
        &self.ctx.ephemeral
    }

    /// Encrypt `plaintext` into a new blob file under the current key.
    ///
    /// `metadata` stays with the caller, who stores it next to the returned
    /// descriptor; only its capture time is carried into `created_at`.
    /// Rejected with `VaultBusy` while a wipe is pending.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        metadata: &PhotoMetadata,
    ) -> VaultResult<EncryptedBlob> {
        let _op = self.gate.enter().await?;
        self.seal(plaintext, metadata).await
    }

    /// Decrypt `blob` into a fresh file in the ephemeral cache.
    ///
    /// Concurrent calls for the same blob id share one decrypt. On
    /// `Integrity` no file is written and no plaintext is returned; the
    /// viewer shows a placeholder instead.
    pub async fn decrypt(&self, blob: &EncryptedBlob) -> VaultResult<EphemeralDecryptedFile> {
        let _op = self.gate.enter().await?;
        self.view(blob).await
    }

    /// Remove the ciphertext file. No scrubbing; see `SecureEraser` for that.
    /// A blob whose file is already gone deletes successfully.
    pub async fn delete(&self, blob: &EncryptedBlob) -> VaultResult<()> {
        let _op = self.gate.enter().await?;
        self.remove_file(blob).await
    }

    /// Sweep the ephemeral cache. Not gated: cleanup must run even while a
    /// wipe is pending.
    pub async fn cleanup_ephemeral(&self) -> VaultResult<usize> {
        self.ctx.ephemeral.clear().await
    }

    /// Every blob file on disk, catalogued or not.
    pub async fn blob_files(&self) -> VaultResult<Vec<PathBuf>> {
        let files = self
            .ctx
            .fs
            .list(&self.ctx.blob_dir)
            .await
            .map_err(|e| VaultError::read(self.ctx.blob_dir.display(), e))?;
        Ok(files
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == BLOB_EXTENSION))
            .collect())
    }

    /// Key versions that at least one blob file on disk was sealed under,
    /// whether or not the catalog knows about that blob.
    pub async fn versions_on_disk(&self) -> VaultResult<BTreeSet<u32>> {
        Ok(self
            .blob_files()
            .await?
            .iter()
            .filter_map(|path| blob_file_version(path))
            .collect())
    }

    // Ungated variants for the controller, which already holds the gate.
    // Re-entering would nest read locks behind a queued wipe and deadlock.

    pub(crate) async fn seal(
        &self,
        plaintext: &[u8],
        metadata: &PhotoMetadata,
    ) -> VaultResult<EncryptedBlob> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = match metadata.captured_at {
            0 => now_epoch(),
            at => at,
        };
        let blob = self.ctx.seal_as(&id, plaintext, created_at).await?;
        tracing::debug!(
            blob_id = %blob.id,
            key_version = blob.key_version,
            len = blob.plaintext_len,
            category = %metadata.category,
            "sealed blob"
        );
        Ok(blob)
    }

    pub(crate) async fn view(&self, blob: &EncryptedBlob) -> VaultResult<EphemeralDecryptedFile> {
        let ctx = self.ctx.clone();
        let owned = blob.clone();
        self.decrypts
            .run(blob.id.clone(), move || async move {
                ctx.decrypt_to_ephemeral(&owned).await
            })
            .await
    }

    pub(crate) async fn remove_file(&self, blob: &EncryptedBlob) -> VaultResult<()> {
        match self.ctx.fs.remove(&blob.ciphertext_path).await {
            Ok(()) => {
                tracing::debug!(blob_id = %blob.id, "deleted blob file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::write(blob.ciphertext_path.display(), e)),
        }
    }

    /// Re-seal `blob` under the current key into a new file, keeping its id
    /// and creation time. The old file is left for the caller to remove once
    /// the new descriptor is persisted. Already-current blobs are returned
    /// unchanged.
    pub(crate) async fn reencrypt(&self, blob: &EncryptedBlob) -> VaultResult<EncryptedBlob> {
        let current = self.ctx.keys.ensure_key().await?;
        if blob.key_version == current.version {
            return Ok(blob.clone());
        }
        let plaintext = self.ctx.open(blob).await?;
        let resealed = self
            .ctx
            .seal_as(&blob.id, &plaintext, blob.created_at)
            .await?;
        tracing::debug!(
            blob_id = %blob.id,
            from = blob.key_version,
            to = resealed.key_version,
            "re-encrypted blob"
        );
        Ok(resealed)
    }

    /// Decrypt without producing an ephemeral file (integrity checks).
    pub(crate) async fn authenticate(&self, blob: &EncryptedBlob) -> VaultResult<()> {
        self.ctx.open(blob).await.map(|_| ())
    }
}

/// `{id}.v{N}.blob` -> `N`
fn blob_file_version(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (_, version) = stem.rsplit_once(".v")?;
    version.parse().ok()
}
