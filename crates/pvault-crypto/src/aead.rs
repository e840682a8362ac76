//! XChaCha20-Poly1305 with a detached tag
//!
//! Sealed blob format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: Poly1305 tag]      nonce kept in the descriptor
//! AAD = key_version (4 bytes, big-endian) || blob_id (UTF-8)
//! ```
//!
//! The AAD binds a ciphertext to its descriptor, so a blob file cannot be
//! swapped under another id or replayed under a different key version.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Ciphertext and its detached authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl Sealed {
    /// On-disk form: `ciphertext || tag`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Split `ciphertext || tag`. Returns `Integrity` if the input is too short
    /// to carry a tag.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < TAG_SIZE {
            return Err(CryptoError::Integrity);
        }
        let (ciphertext, tag_bytes) = data.split_at(data.len() - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);
        Ok(Self {
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }
}

/// Build AAD: key_version (4 bytes BE) || blob_id
pub fn blob_aad(key_version: u32, blob_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + blob_id.len());
    aad.extend_from_slice(&key_version.to_be_bytes());
    aad.extend_from_slice(blob_id.as_bytes());
    aad
}

/// Encrypt `plaintext` under `key` and `nonce`, returning ciphertext and tag.
pub fn seal_detached(
    key: &KeyMaterial,
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Sealed, CryptoError> {
    check_nonce(nonce)?;
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(XNonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(Sealed {
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate. Tag comparison is constant-time (done inside
/// Poly1305 verification); on failure the working buffer is zeroized and no
/// plaintext is returned.
pub fn open_detached(
    key: &KeyMaterial,
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_nonce(nonce)?;
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::Integrity);
    }
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        XNonce::from_slice(nonce),
        aad,
        &mut buffer,
        Tag::from_slice(tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(CryptoError::Integrity)
        }
    }
}

fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn key(byte: u8) -> KeyMaterial {
        KeyMaterial::from_bytes([byte; KEY_SIZE])
    }

    const NONCE: [u8; NONCE_SIZE] = [9u8; NONCE_SIZE];

    #[test]
    fn test_seal_open_roundtrip() {
        let aad = blob_aad(1, "blob-a");
        let sealed = seal_detached(&key(1), &NONCE, &aad, b"progress photo bytes").unwrap();
        let opened = open_detached(&key(1), &NONCE, &aad, &sealed.ciphertext, &sealed.tag).unwrap();
        assert_eq!(opened, b"progress photo bytes");
    }

    #[test]
    fn test_seal_open_empty() {
        let sealed = seal_detached(&key(1), &NONCE, b"", b"").unwrap();
        assert!(sealed.ciphertext.is_empty());
        let opened = open_detached(&key(1), &NONCE, b"", &sealed.ciphertext, &sealed.tag).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = seal_detached(&key(1), &NONCE, b"", b"secret").unwrap();
        let result = open_detached(&key(2), &NONCE, b"", &sealed.ciphertext, &sealed.tag);
        assert_eq!(result, Err(CryptoError::Integrity));
    }

    #[test]
    fn test_open_wrong_aad() {
        let sealed = seal_detached(&key(1), &NONCE, &blob_aad(1, "a"), b"secret").unwrap();

        let other_id = open_detached(&key(1), &NONCE, &blob_aad(1, "b"), &sealed.ciphertext, &sealed.tag);
        assert_eq!(other_id, Err(CryptoError::Integrity), "blob id is bound");

        let other_version =
            open_detached(&key(1), &NONCE, &blob_aad(2, "a"), &sealed.ciphertext, &sealed.tag);
        assert_eq!(other_version, Err(CryptoError::Integrity), "key version is bound");
    }

    #[test]
    fn test_tampered_tag() {
        let mut sealed = seal_detached(&key(1), &NONCE, b"", b"secret data").unwrap();
        sealed.tag[0] ^= 0x01;
        let result = open_detached(&key(1), &NONCE, b"", &sealed.ciphertext, &sealed.tag);
        assert_eq!(result, Err(CryptoError::Integrity));
    }

    #[test]
    fn test_bad_lengths() {
        assert!(matches!(
            seal_detached(&key(1), &[0u8; 12], b"", b"x"),
            Err(CryptoError::InvalidNonceLength { expected: 24, actual: 12 })
        ));
        assert_eq!(
            open_detached(&key(1), &NONCE, b"", b"x", &[0u8; 8]),
            Err(CryptoError::Integrity)
        );
    }

    #[test]
    fn test_sealed_bytes_layout() {
        let sealed = seal_detached(&key(1), &NONCE, b"", &[0u8; 1000]).unwrap();
        let bytes = sealed.to_bytes();
        // ciphertext (1000) + tag (16)
        assert_eq!(bytes.len(), 1000 + TAG_SIZE);
        assert_eq!(Sealed::from_bytes(&bytes).unwrap(), sealed);
        assert_eq!(Sealed::from_bytes(&[0u8; 3]), Err(CryptoError::Integrity));
    }
}
