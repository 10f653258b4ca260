//! Local private key sources and peer public key parsing.

use p384::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p384::{PublicKey, SecretKey};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::CryptoError;

/// Supplies this node's long-term ECDH private key.
///
/// The key is loaded once at startup and only read afterwards, so one
/// provider can be shared by every request handler.
pub trait KeyMaterialProvider: Send + Sync {
    /// The node's private key.
    fn local_private_key(&self) -> &SecretKey;

    /// The public half, as published to the hub.
    fn local_public_key(&self) -> PublicKey {
        self.local_private_key().public_key()
    }
}

/// Private key read from a PEM file.
pub struct FileKeyProvider {
    path: PathBuf,
    key: SecretKey,
}

impl FileKeyProvider {
    /// Reads and parses the PEM file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref().to_path_buf();
        let pem = std::fs::read_to_string(&path).map_err(|source| CryptoError::KeyFile {
            path: path.clone(),
            source,
        })?;
        let key = parse_private_key_pem(&pem)?;
        tracing::debug!(path = %path.display(), "loaded ECDH private key from file");
        Ok(Self { path, key })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyMaterialProvider for FileKeyProvider {
    fn local_private_key(&self) -> &SecretKey {
        &self.key
    }
}

impl fmt::Debug for FileKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKeyProvider")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Private key supplied inline through configuration.
pub struct InlineKeyProvider {
    key: SecretKey,
}

impl InlineKeyProvider {
    /// Parses PEM bytes. Literal `\n` sequences, as produced when a PEM
    /// block is squeezed into a single environment variable, are turned
    /// back into newlines first.
    pub fn from_pem_bytes(pem: &[u8]) -> Result<Self, CryptoError> {
        let text = std::str::from_utf8(pem)
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("PEM is not UTF-8: {e}")))?;
        let key = parse_private_key_pem(&text.replace("\\n", "\n"))?;
        Ok(Self { key })
    }
}

impl KeyMaterialProvider for InlineKeyProvider {
    fn local_private_key(&self) -> &SecretKey {
        &self.key
    }
}

impl fmt::Debug for InlineKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineKeyProvider").finish_non_exhaustive()
    }
}

/// Parses a P-384 private key from PKCS#8 or SEC1 PEM.
pub fn parse_private_key_pem(pem: &str) -> Result<SecretKey, CryptoError> {
    let pem = pem.trim();
    let parsed = if pem.contains("BEGIN EC PRIVATE KEY") {
        SecretKey::from_sec1_pem(pem).map_err(|e| e.to_string())
    } else {
        SecretKey::from_pkcs8_pem(pem).map_err(|e| e.to_string())
    };
    parsed.map_err(CryptoError::InvalidPrivateKey)
}

/// Parses a peer's public key as published by the hub.
///
/// The hub stores the SubjectPublicKeyInfo PEM hex-encoded; a bare PEM block
/// is accepted as well.
pub fn parse_peer_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let trimmed = encoded.trim();
    let pem = if trimmed.starts_with("-----BEGIN") {
        trimmed.to_string()
    } else {
        let raw = hex::decode(trimmed)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("not hex: {e}")))?;
        String::from_utf8(raw)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("PEM is not UTF-8: {e}")))?
    };

    PublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}
