use pvault_core::VaultError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("platform RNG unavailable: {0}")]
    EntropyUnavailable(String),

    /// Tag mismatch: the ciphertext, tag, nonce, key or associated data differ
    /// from what was sealed.
    #[error("authentication failed")]
    Integrity,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::EntropyUnavailable(msg) => VaultError::EntropyUnavailable(msg),
            CryptoError::Integrity | CryptoError::InvalidNonceLength { .. } => {
                VaultError::Integrity
            }
            CryptoError::InvalidKeyLength { .. } | CryptoError::InvalidKeyEncoding(_) => {
                VaultError::KeyUnavailable(e.to_string())
            }
            CryptoError::Encrypt(msg) => VaultError::InvalidState(format!("encryption: {msg}")),
        }
    }
}
