//! Serving stored objects, optionally decrypting them on the fly.
//!
//! With a key, the object is opened twice: a pre-check read authenticates the
//! first unit before anything is returned to the caller, then a fresh read
//! is decrypted unit by unit. Backends able to seek could fold the two reads
//! into one; neither backend here can.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tessera_crypto::{decrypt_unit, SharedKey, UnitAssembler};

use crate::error::ServiceError;
use crate::hub::Hub;
use crate::objects::{ByteStream, ObjectStore};

/// An object's bytes plus the content type it was stored with, if known.
pub struct OpenedObject {
    pub content_type: Option<String>,
    pub body: ByteStream,
}

/// Something that can be read from the start any number of times.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Opens a fresh read. The returned stream is the read handle; dropping
    /// it releases the underlying resource.
    async fn open(&self) -> Result<OpenedObject, ServiceError>;

    /// Identifier used in logs and error messages.
    fn describe(&self) -> &str;
}

/// An object in the local object store.
pub struct LocalObjectSource {
    pub store: Arc<dyn ObjectStore>,
    pub key: String,
}

#[async_trait]
impl ObjectSource for LocalObjectSource {
    async fn open(&self) -> Result<OpenedObject, ServiceError> {
        let object = self.store.get(&self.key).await?;
        Ok(OpenedObject {
            content_type: Some(object.content_type),
            body: object.body,
        })
    }

    fn describe(&self) -> &str {
        &self.key
    }
}

/// A bucket file held by the hub's storage service.
pub struct HubObjectSource {
    pub hub: Arc<dyn Hub>,
    pub file_id: String,
}

#[async_trait]
impl ObjectSource for HubObjectSource {
    async fn open(&self) -> Result<OpenedObject, ServiceError> {
        let body = self.hub.stream_bucket_file(&self.file_id).await?;
        Ok(OpenedObject {
            content_type: None,
            body,
        })
    }

    fn describe(&self) -> &str {
        &self.file_id
    }
}

/// Opens `source`, decrypting it with `key` if one is given.
///
/// # Errors
///
/// Returns `DecryptionNotPossible` if the first unit does not authenticate
/// under `key`. No bytes have been handed out at that point.
pub async fn fetch(
    source: &dyn ObjectSource,
    key: Option<SharedKey>,
) -> Result<OpenedObject, ServiceError> {
    let Some(key) = key else {
        return source.open().await;
    };

    precheck_first_unit(source, &key).await?;

    let opened = source.open().await?;
    Ok(OpenedObject {
        content_type: opened.content_type,
        body: decrypt_stream(opened.body, key),
    })
}

/// Reads just enough of a fresh handle to authenticate the first unit.
/// The handle is dropped on return, whatever the outcome.
async fn precheck_first_unit(source: &dyn ObjectSource, key: &SharedKey) -> Result<(), ServiceError> {
    let mut body = source.open().await?.body;
    let mut assembler = UnitAssembler::new();

    let first = loop {
        if let Some(unit) = assembler.next_unit() {
            break unit;
        }
        match body.next().await {
            Some(Ok(chunk)) => assembler.push(&chunk),
            Some(Err(e)) => {
                tracing::error!(object = source.describe(), error = %e, "read failed during decryption pre-check");
                return Err(ServiceError::UpstreamUnavailable(
                    "Failed to read object for decryption".to_string(),
                ));
            }
            None => break assembler.finish().unwrap_or_default(),
        }
    };

    decrypt_unit(key, &first).map(|_| ()).map_err(|e| {
        tracing::warn!(object = source.describe(), error = %e, "decryption pre-check failed");
        ServiceError::DecryptionNotPossible(format!(
            "File with ID {} cannot be decrypted under the assumption that the file was \
             encrypted by the given node for this node.",
            source.describe()
        ))
    })
}

struct DecryptState {
    inner: ByteStream,
    assembler: UnitAssembler,
    key: SharedKey,
    exhausted: bool,
}

/// Decrypts units in arrival order. A unit that fails authentication ends
/// the stream with an error; its plaintext is never emitted.
fn decrypt_stream(inner: ByteStream, key: SharedKey) -> ByteStream {
    let state = DecryptState {
        inner,
        assembler: UnitAssembler::new(),
        key,
        exhausted: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            let unit = match state.assembler.next_unit() {
                Some(unit) => unit,
                None if state.exhausted => return None,
                None => match state.inner.next().await {
                    Some(Ok(chunk)) => {
                        state.assembler.push(&chunk);
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => {
                        state.exhausted = true;
                        match state.assembler.finish() {
                            Some(unit) => unit,
                            None => return None,
                        }
                    }
                },
            };

            return match decrypt_unit(&state.key, &unit) {
                Ok(plaintext) => Some((Ok(Bytes::from(plaintext)), Some(state))),
                Err(e) => {
                    tracing::warn!(error = %e, "unit failed authentication mid-stream");
                    Some((
                        Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "encrypted unit failed authentication",
                        )),
                        None,
                    ))
                }
            };
        }
    })
    .boxed()
}
