//! pvault-core: shared types, configuration schema, and the vault error taxonomy
//!
//! Every other pvault crate depends on this one. Nothing in here touches key
//! material; the types describe descriptors and ordinary (non-secret) state.

pub mod config;
pub mod error;
pub mod types;

pub use config::PvaultConfig;
pub use error::{VaultError, VaultResult};
pub use types::{EncryptedBlob, EphemeralDecryptedFile, PhotoMetadata, VaultState};
