//! Key types: raw 256-bit key material and the versioned, device-bound master key

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::KEY_SIZE;

/// 256-bit symmetric key material. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy key material out of a slice of exactly `KEY_SIZE` bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Base64 form used for the secure key/value store.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(encoded.trim().as_bytes())
                .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?,
        );
        Self::from_slice(&decoded)
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The device's active master key.
///
/// `material` never leaves the vault boundary except as an argument to
/// [`CryptoProvider`](crate::CryptoProvider) calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKey {
    pub material: KeyMaterial,
    pub version: u32,
    pub device_fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip() {
        let key = KeyMaterial::from_bytes([7u8; KEY_SIZE]);
        let encoded = key.to_base64();
        let decoded = KeyMaterial::from_base64(&encoded).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = KeyMaterial::from_slice(&[1u8; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: 16
            }
        );
    }

    #[test]
    fn test_from_base64_rejects_garbage() {
        assert!(matches!(
            KeyMaterial::from_base64("not base64 !!"),
            Err(CryptoError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_debug_redacts_material() {
        let key = MasterKey {
            material: KeyMaterial::from_bytes([0xAB; KEY_SIZE]),
            version: 1,
            device_fingerprint: "dfp-test".into(),
        };
        let rendered = format!("{key:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("171"), "raw byte values must not appear");
    }
}
