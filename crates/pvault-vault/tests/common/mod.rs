//! Shared test doubles: in-memory secure storage, a call-counting crypto
//! provider, and a filesystem wrapper that injects delays and failures.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pvault_core::types::entries;
use pvault_core::{VaultError, VaultResult};
use pvault_crypto::{CryptoError, CryptoProvider, KeyMaterial, Sealed, SystemCrypto};
use pvault_secrets::SecureStorageProvider;
use pvault_vault::{BlobFs, LocalFs, VaultController, VaultOptions, VaultPaths};

/// Secure storage held in a map. Can be told to return a wrong value for the
/// verification probe, or to refuse writes.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    pub tamper_probe: AtomicBool,
    pub refuse_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecureStorageProvider for MemoryStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, name: &str) -> VaultResult<Option<String>> {
        if name == entries::VERIFY_PROBE && self.tamper_probe.load(Ordering::SeqCst) {
            return Ok(Some("tampered".into()));
        }
        Ok(self.entries.lock().unwrap().get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> VaultResult<()> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(VaultError::write(name, "store locked"));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> VaultResult<()> {
        self.entries.lock().unwrap().remove(name);
        Ok(())
    }
}

/// `SystemCrypto` that counts AEAD calls and key generations.
#[derive(Default)]
pub struct CountingCrypto {
    pub encrypts: AtomicUsize,
    pub decrypts: AtomicUsize,
    pub keys_generated: AtomicUsize,
}

impl CryptoProvider for CountingCrypto {
    fn random_bytes(&self, n: usize) -> Result<Vec<u8>, CryptoError> {
        SystemCrypto.random_bytes(n)
    }

    fn generate_key(&self) -> Result<KeyMaterial, CryptoError> {
        self.keys_generated.fetch_add(1, Ordering::SeqCst);
        SystemCrypto.generate_key()
    }

    fn aead_encrypt(
        &self,
        key: &KeyMaterial,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Sealed, CryptoError> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        SystemCrypto.aead_encrypt(key, nonce, aad, plaintext)
    }

    fn aead_decrypt(
        &self,
        key: &KeyMaterial,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        SystemCrypto.aead_decrypt(key, nonce, aad, ciphertext, tag)
    }
}

/// `LocalFs` with an optional read/overwrite delay and a set of paths whose
/// overwrite, removal, and replacement by rename fail.
#[derive(Default)]
pub struct FaultyFs {
    pub read_delay: Mutex<Duration>,
    pub overwrite_delay: Mutex<Duration>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl FaultyFs {
    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().unwrap().insert(path.to_path_buf());
    }

    fn check(&self, path: &Path) -> io::Result<()> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobFs for FaultyFs {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        LocalFs.read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        LocalFs.write(path, data).await
    }

    async fn overwrite(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let delay = *self.overwrite_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check(path)?;
        LocalFs.overwrite(path, data).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(to)?;
        LocalFs.rename(from, to).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.check(path)?;
        LocalFs.remove(path).await
    }

    async fn file_len(&self, path: &Path) -> io::Result<u64> {
        LocalFs.file_len(path).await
    }

    async fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        LocalFs.list(dir).await
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        LocalFs.create_dir_all(dir).await
    }
}

/// A controller over test doubles rooted in `root`.
pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub crypto: Arc<CountingCrypto>,
    pub fs: Arc<FaultyFs>,
    pub paths: VaultPaths,
}

impl Harness {
    pub fn new(root: &Path) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::default()),
            crypto: Arc::new(CountingCrypto::default()),
            fs: Arc::new(FaultyFs::default()),
            paths: VaultPaths::under(root),
        }
    }

    pub fn controller(&self, target_version: u32) -> VaultController {
        VaultController::new(
            self.storage.clone(),
            self.crypto.clone(),
            self.fs.clone(),
            self.paths.clone(),
            VaultOptions {
                target_version,
                random_passes: 1,
            },
        )
    }

    pub async fn ready_controller(&self) -> VaultController {
        let controller = self.controller(1);
        controller.initialize().await.unwrap();
        controller
    }
}

/// Deterministic pseudo-photo bytes.
pub fn photo_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
