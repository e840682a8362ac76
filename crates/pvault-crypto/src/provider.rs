//! The randomness + AEAD seam used by every vault component.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::aead::{open_detached, seal_detached, Sealed};
use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::{KEY_SIZE, NONCE_SIZE};

/// CSPRNG plus authenticated encryption. Stateless; shared behind an `Arc`.
pub trait CryptoProvider: Send + Sync {
    /// `n` bytes from the platform CSPRNG.
    fn random_bytes(&self, n: usize) -> Result<Vec<u8>, CryptoError>;

    fn aead_encrypt(
        &self,
        key: &KeyMaterial,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Sealed, CryptoError>;

    /// Must never return partial plaintext: either the whole authenticated
    /// message or `CryptoError::Integrity`.
    fn aead_decrypt(
        &self,
        key: &KeyMaterial,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// A fresh random nonce of the right size for the AEAD.
    fn generate_nonce(&self) -> Result<Vec<u8>, CryptoError> {
        self.random_bytes(NONCE_SIZE)
    }

    /// A fresh random 256-bit key.
    fn generate_key(&self) -> Result<KeyMaterial, CryptoError> {
        let mut bytes = self.random_bytes(KEY_SIZE)?;
        let key = KeyMaterial::from_slice(&bytes);
        zeroize::Zeroize::zeroize(&mut bytes);
        key
    }
}

/// Production provider: OS RNG and XChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCrypto;

impl CryptoProvider for SystemCrypto {
    fn random_bytes(&self, n: usize) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; n];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| {
                tracing::error!(requested = n, "OS RNG failure: {e}");
                CryptoError::EntropyUnavailable(e.to_string())
            })?;
        Ok(buf)
    }

    fn aead_encrypt(
        &self,
        key: &KeyMaterial,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Sealed, CryptoError> {
        seal_detached(key, nonce, aad, plaintext)
    }

    fn aead_decrypt(
        &self,
        key: &KeyMaterial,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        open_detached(key, nonce, aad, ciphertext, tag)
    }
}
