//! Portable user-data export.
//!
//! Carries the non-secret vault state and photo metadata. Blob ids, paths,
//! nonces, tags and all key material are left out; each photo is represented
//! by a fixed redaction placeholder.

use pvault_core::types::now_epoch;
use pvault_core::{PhotoMetadata, VaultError, VaultResult, VaultState};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

pub const EXPORT_FORMAT: &str = "pvault-export";
pub const EXPORT_FORMAT_VERSION: u32 = 1;
pub const REDACTED_PHOTO: &str = "<redacted:encrypted-photo>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub format: String,
    pub format_version: u32,
    pub exported_at: u64,
    pub vault: VaultState,
    pub photos: Vec<ExportedPhoto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPhoto {
    pub metadata: PhotoMetadata,
    /// Always [`REDACTED_PHOTO`]
    pub photo: String,
}

impl ExportSnapshot {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            format: EXPORT_FORMAT.to_string(),
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: now_epoch(),
            vault: state.vault.clone(),
            photos: state
                .photos
                .iter()
                .map(|record| ExportedPhoto {
                    metadata: record.metadata.clone(),
                    photo: REDACTED_PHOTO.to_string(),
                })
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> VaultResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::InvalidState(format!("serializing export: {e}")))
    }
}
