//! Object store abstraction for locally kept results.
//!
//! Objects are addressed by slash-separated keys of the form
//! `local/{project_id}/{object_id}`. Reads hand out an owned byte stream;
//! dropping the stream releases the underlying read handle.

mod fs;
mod memory;

pub use fs::FileObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;
use thiserror::Error;

/// A stream of byte chunks from a store or the hub.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Content type recorded when an upload does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors returned by object store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),

    #[error("invalid object key `{0}`")]
    InvalidKey(String),

    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt object metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Bytes to store under a key.
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    pub content_type: String,
    pub data: Bytes,
}

/// An open object: its metadata plus a read handle on its bytes.
pub struct StoredObject {
    pub content_type: String,
    pub content_length: u64,
    pub body: ByteStream,
}

/// Key-value byte storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `upload` under `key`, replacing any previous object.
    async fn put(&self, key: &str, upload: ObjectUpload) -> Result<(), StoreError>;

    /// Opens the object under `key` for streaming.
    ///
    /// Returns `StoreError::NotFound` if there is no such object.
    async fn get(&self, key: &str) -> Result<StoredObject, StoreError>;

    /// Lists every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Removes the object under `key`. Removing a missing object is not an
    /// error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Key of a local result object.
pub fn object_key(project_id: &str, object_id: &str) -> String {
    format!("local/{project_id}/{object_id}")
}

/// Prefix covering every local result of a project.
pub fn project_prefix(project_id: &str) -> String {
    format!("local/{project_id}/")
}

/// Buffers a whole stream.
pub async fn read_to_end(mut body: ByteStream) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.try_next().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Checks that every segment of `key` is a plain name.
///
/// A single trailing slash is allowed so that prefixes validate too.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let trimmed = key.strip_suffix('/').unwrap_or(key);
    let valid = !trimmed.is_empty()
        && !trimmed.contains('\\')
        && trimmed
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_project() {
        assert_eq!(object_key("p1", "o1"), "local/p1/o1");
        assert!(object_key("p1", "o1").starts_with(&project_prefix("p1")));
        assert!(!object_key("p10", "o1").starts_with(&project_prefix("p1")));
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("local/p1/o1").is_ok());
        assert!(validate_key("local/p1/").is_ok());

        for bad in ["", "/", "local//o1", "local/../o1", "local/./o1", "/local", "local\\p1", "local/p1//"] {
            assert!(
                matches!(validate_key(bad), Err(StoreError::InvalidKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
