//! Key agreement and single-unit authenticated encryption.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use p384::{PublicKey, SecretKey};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// ChaCha20-Poly1305 nonce width.
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag width.
pub const TAG_LEN: usize = 16;

const KEY_LEN: usize = 32;

const HKDF_INFO: &[u8] = b"tessera-secure-channel-unit-key";

/// Symmetric key shared by exactly one (sender, receiver) key pair.
///
/// The key bytes are wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_LEN]);

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Derives the unit key for traffic between `local` and `peer`.
///
/// ECDH is symmetric, so `derive_shared_key(a_priv, b_pub)` and
/// `derive_shared_key(b_priv, a_pub)` yield the same key. The raw ECDH
/// output only ever feeds HKDF and p384 wipes it on drop; the expanded key
/// is written straight into the returned `SharedKey`.
pub fn derive_shared_key(local: &SecretKey, peer: &PublicKey) -> Result<SharedKey, CryptoError> {
    let shared = p384::ecdh::diffie_hellman(local.to_nonzero_scalar(), peer.as_affine());
    let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
    let mut key = SharedKey([0u8; KEY_LEN]);
    hk.expand(HKDF_INFO, &mut key.0)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Seals `plaintext` into one unit: `nonce || ciphertext || tag`.
///
/// Every call draws a fresh random nonce.
pub fn encrypt_unit(key: &SharedKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(&Key::from(key.0));
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = Nonce::from(nonce_bytes);
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut unit = Vec::with_capacity(NONCE_LEN + sealed.len());
    unit.extend_from_slice(&nonce_bytes);
    unit.extend_from_slice(&sealed);
    Ok(unit)
}

/// Opens one unit produced by [`encrypt_unit`].
///
/// # Errors
///
/// `MalformedUnit` if the input is shorter than nonce plus tag,
/// `AuthenticationFailure` if the tag does not verify. No plaintext is
/// returned in either case.
pub fn decrypt_unit(key: &SharedKey, unit: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if unit.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedUnit { len: unit.len() });
    }

    let (nonce_bytes, sealed) = unit.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(&Key::from(key.0));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CryptoError::AuthenticationFailure)
}
