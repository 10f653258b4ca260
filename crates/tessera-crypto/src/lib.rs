//! Secure channel between two federated nodes.
//!
//! A sender and a receiver each hold a long-term P-384 key pair. Both sides
//! derive the same symmetric key with ECDH followed by HKDF-SHA256, so an
//! object sealed once can be opened much later by a different process on
//! the receiving node without any handshake state.
//!
//! Payloads are sealed as a sequence of independent units. Every unit
//! carries its own nonce and Poly1305 tag and can be authenticated without
//! seeing any other unit:
//!
//! ```text
//! unit = nonce (12) || ciphertext (n) || tag (16)
//! ```
//!
//! Plaintext is split into fixed 64 KiB slices (see [`framing`]) so the
//! receiving side can recover unit boundaries from any transport chunking.

pub mod codec;
pub mod error;
pub mod framing;
pub mod keys;

pub use codec::{decrypt_unit, derive_shared_key, encrypt_unit, SharedKey, NONCE_LEN, TAG_LEN};
pub use error::CryptoError;
pub use framing::{open_payload, seal_payload, UnitAssembler, UNIT_PLAINTEXT_LEN, UNIT_SEALED_LEN};
pub use keys::{
    parse_peer_public_key, parse_private_key_pem, FileKeyProvider, InlineKeyProvider,
    KeyMaterialProvider,
};

/// Re-exported key types so dependents do not need a direct `p384` dependency.
pub use p384::{PublicKey, SecretKey};
