//! Error types for the secure channel.

use std::path::PathBuf;

/// Errors produced while loading keys or sealing and opening units.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The unit's tag did not verify: tampering, wrong key or misaligned
    /// input. The whole unit must be discarded.
    #[error("unit failed authentication")]
    AuthenticationFailure,

    /// The unit is shorter than a nonce plus a tag and cannot be a sealed unit.
    #[error("malformed unit: {len} bytes is shorter than the sealing overhead")]
    MalformedUnit { len: usize },

    /// HKDF refused to expand the ECDH secret into a unit key.
    #[error("failed to derive shared key: {0}")]
    KeyDerivation(String),

    /// The AEAD refused to seal the plaintext.
    #[error("failed to seal unit")]
    Encryption,

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The private key file could not be read.
    #[error("failed to read key file {path:?}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CryptoError {
    /// Returns `true` for every failure that means "this unit cannot be
    /// opened with this key", as opposed to a configuration problem.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::AuthenticationFailure | CryptoError::MalformedUnit { .. }
        )
    }
}
