//! pvault-crypto: randomness and authenticated encryption for the photo vault
//!
//! Primitive: XChaCha20-Poly1305 with a detached tag.
//!
//! ```text
//! Master Key (256-bit, CSPRNG, one active version per device)
//!   └── Blob AEAD: key=master[version], nonce=random_192bit,
//!       AAD = key_version (4 bytes BE) || blob_id
//!       output = ciphertext || 16-byte Poly1305 tag
//! ```
//!
//! Everything above this crate talks to a [`CryptoProvider`], so tests can
//! substitute counting or failing implementations.

pub mod aead;
pub mod error;
pub mod keys;
pub mod provider;

pub use aead::{blob_aad, open_detached, seal_detached, Sealed};
pub use error::CryptoError;
pub use keys::{KeyMaterial, MasterKey};
pub use provider::{CryptoProvider, SystemCrypto};

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
