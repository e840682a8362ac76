use std::fmt::Display;

use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Typed failures surfaced by the vault.
///
/// `Clone` so that one in-flight result can be handed to every caller that was
/// coalesced onto it. Low-level I/O errors are flattened into `StorageRead` /
/// `StorageWrite` at the component boundary for the same reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("entropy unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("integrity check failed: ciphertext or authentication tag does not verify")]
    Integrity,

    #[error("storage read error: {0}")]
    StorageRead(String),

    #[error("storage write error: {0}")]
    StorageWrite(String),

    #[error("vault busy: a wipe is in progress")]
    VaultBusy,

    #[error(
        "blob was encrypted under key version {blob_version}, current version is \
         {current_version} and the old key is no longer retained"
    )]
    MigrationRequired {
        blob_version: u32,
        current_version: u32,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("wipe finished with {failed} item(s) that could not be erased")]
    WipePartialFailure { failed: usize },
}

impl VaultError {
    /// Build a `StorageRead` error from a subject (path, entry name) and cause.
    pub fn read(subject: impl Display, cause: impl Display) -> Self {
        VaultError::StorageRead(format!("{subject}: {cause}"))
    }

    /// Build a `StorageWrite` error from a subject (path, entry name) and cause.
    pub fn write(subject: impl Display, cause: impl Display) -> Self {
        VaultError::StorageWrite(format!("{subject}: {cause}"))
    }

    /// Errors that indicate tampering or a broken key hierarchy rather than a
    /// transient I/O problem.
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::Integrity
                | VaultError::KeyUnavailable(_)
                | VaultError::MigrationRequired { .. }
        )
    }

    /// Errors a caller may reasonably retry without user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::VaultBusy | VaultError::StorageRead(_) | VaultError::StorageWrite(_)
        )
    }
}
