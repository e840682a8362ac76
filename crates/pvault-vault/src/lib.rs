//! pvault-vault: key vault, encrypted blob store, secure eraser and the vault
//! controller
//!
//! Construct one [`VaultController`] at the composition root and pass it by
//! reference. Every dependency (secure storage, crypto, filesystem) is
//! injected, so tests swap in counting or failing implementations.

pub mod app_state;
pub mod blob_store;
pub mod controller;
pub mod ephemeral;
pub mod eraser;
pub mod export;
pub mod fs;
pub mod gate;
pub mod key_vault;
pub mod singleflight;

pub use app_state::{AppState, AppStateStore, PhotoRecord};
pub use blob_store::EncryptedBlobStore;
pub use controller::{
    AuditReport, LifecycleEvent, MigrationSummary, VaultController, VaultOptions, VaultPaths,
    VaultPhase, VaultStatus,
};
pub use eraser::{SecureEraser, WipeFailure, WipeReport};
pub use export::ExportSnapshot;
pub use fs::{BlobFs, LocalFs};
pub use gate::VaultGate;
pub use key_vault::{KeyVault, UpgradeOutcome};
pub use singleflight::SingleFlight;
