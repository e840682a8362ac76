use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Names of the entries the vault keeps in the secure key/value store.
pub mod entries {
    /// Current master key material (base64)
    pub const ENCRYPTION_KEY: &str = "encryption-key";
    /// Version marker of the current master key
    pub const ENCRYPTION_VERSION: &str = "encryption-version";
    /// Locally generated device fingerprint
    pub const DEVICE_FINGERPRINT: &str = "device-fingerprint";
    /// Unix timestamp of the last successful round-trip verification
    pub const LAST_VERIFIED_AT: &str = "last-verified-at";
    /// Throwaway entry written and removed by verification
    pub const VERIFY_PROBE: &str = "vault-verify-probe";

    /// Entry retaining the key material of a specific version, so blobs
    /// encrypted under it remain readable until they are re-encrypted.
    pub fn retained_key(version: u32) -> String {
        format!("{ENCRYPTION_KEY}.v{version}")
    }
}

/// Descriptor of one encrypted photo on disk.
///
/// The blob file at `ciphertext_path` holds `ciphertext || tag`; the nonce and
/// a copy of the tag are kept here alongside ordinary app state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// UUID v4, also the dedup key for concurrent decrypts
    pub id: String,
    pub ciphertext_path: PathBuf,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
    /// Master key version the blob was sealed under
    pub key_version: u32,
    pub plaintext_len: u64,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

/// A plaintext copy of a blob, living only for one viewer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralDecryptedFile {
    pub blob_id: String,
    pub path: PathBuf,
    pub len: u64,
}

/// Non-secret vault state persisted in the ordinary app state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultState {
    pub initialized: bool,
    pub consent_granted: bool,
    pub encryption_version: u32,
    /// Unix timestamp (seconds) of the last successful verification
    pub last_verified_at: Option<u64>,
}

impl VaultState {
    /// Raise the recorded encryption version. Never lowers it.
    pub fn raise_encryption_version(&mut self, version: u32) {
        self.encryption_version = self.encryption_version.max(version);
    }
}

/// Plaintext application metadata for a captured photo (never encrypted by
/// the vault, never containing key material).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoMetadata {
    /// e.g. "front", "side", "meal"
    pub category: String,
    /// Associated numeric fields, e.g. `weight_kg`, `body_fat_pct`
    pub fields: BTreeMap<String, f64>,
    /// Unix timestamp (seconds) of capture
    pub captured_at: u64,
    pub note: Option<String>,
}

/// Current Unix time in seconds.
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_version_never_decreases() {
        let mut state = VaultState::default();
        state.raise_encryption_version(2);
        state.raise_encryption_version(1);
        assert_eq!(state.encryption_version, 2);
        state.raise_encryption_version(3);
        assert_eq!(state.encryption_version, 3);
    }

    #[test]
    fn test_blob_descriptor_encodes_bytes_as_base64() {
        let blob = EncryptedBlob {
            id: "b1".into(),
            ciphertext_path: PathBuf::from("/tmp/b1.blob"),
            nonce: vec![0u8; 24],
            auth_tag: vec![0xFFu8; 16],
            key_version: 1,
            plaintext_len: 10,
            created_at: 1000,
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["nonce"], "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
        assert_eq!(json["key_version"], 1);

        let parsed: EncryptedBlob = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, blob);
    }

    #[test]
    fn test_vault_state_tolerates_missing_fields() {
        let state: VaultState = serde_json::from_str(r#"{"initialized": true}"#).unwrap();
        assert!(state.initialized);
        assert!(!state.consent_granted);
        assert_eq!(state.encryption_version, 0);
        assert_eq!(state.last_verified_at, None);
    }

    #[test]
    fn test_retained_key_entry_name() {
        assert_eq!(entries::retained_key(3), "encryption-key.v3");
    }
}
