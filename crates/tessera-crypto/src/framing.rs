//! Splitting payloads into fixed-size sealed units and reassembling them
//! from an arbitrarily chunked byte stream.
//!
//! Every unit except the last seals exactly [`UNIT_PLAINTEXT_LEN`] bytes of
//! plaintext, so every sealed unit except the last is exactly
//! [`UNIT_SEALED_LEN`] bytes long. A reader only needs to count bytes to
//! find unit boundaries; how the transport chunks the stream is irrelevant.

use crate::codec::{decrypt_unit, encrypt_unit, SharedKey, NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;

/// Plaintext bytes sealed into each full unit.
pub const UNIT_PLAINTEXT_LEN: usize = 64 * 1024;

/// Size of every full sealed unit on the wire and at rest.
pub const UNIT_SEALED_LEN: usize = NONCE_LEN + UNIT_PLAINTEXT_LEN + TAG_LEN;

/// Seals a whole payload as consecutive units.
///
/// An empty payload still produces one (empty) unit, so every sealed object
/// has a first unit to authenticate.
pub fn seal_payload(key: &SharedKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.is_empty() {
        return encrypt_unit(key, &[]);
    }

    let units = plaintext.len().div_ceil(UNIT_PLAINTEXT_LEN);
    let mut sealed = Vec::with_capacity(plaintext.len() + units * (NONCE_LEN + TAG_LEN));
    for slice in plaintext.chunks(UNIT_PLAINTEXT_LEN) {
        sealed.extend_from_slice(&encrypt_unit(key, slice)?);
    }
    Ok(sealed)
}

/// Opens a fully buffered payload produced by [`seal_payload`].
pub fn open_payload(key: &SharedKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.is_empty() {
        return Err(CryptoError::MalformedUnit { len: 0 });
    }

    let mut plaintext = Vec::with_capacity(sealed.len());
    for unit in sealed.chunks(UNIT_SEALED_LEN) {
        plaintext.extend_from_slice(&decrypt_unit(key, unit)?);
    }
    Ok(plaintext)
}

/// Regroups transport chunks into sealed units.
///
/// Push chunks as they arrive, drain complete units with
/// [`next_unit`](Self::next_unit), and call [`finish`](Self::finish) once the
/// stream ends to collect the trailing short unit.
#[derive(Debug, Default)]
pub struct UnitAssembler {
    buffer: Vec<u8>,
}

impl UnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transport chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Removes and returns the next full unit, if one is buffered.
    pub fn next_unit(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < UNIT_SEALED_LEN {
            return None;
        }
        let rest = self.buffer.split_off(UNIT_SEALED_LEN);
        Some(std::mem::replace(&mut self.buffer, rest))
    }

    /// Returns whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Number of bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
