//! In-memory object store for tests and ephemeral deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};

use super::{validate_key, ObjectStore, ObjectUpload, StoreError, StoredObject};

const DEFAULT_CHUNK_LEN: usize = 16 * 1024;

/// Object store backed by a map. Reads are served in fixed-size chunks.
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, ObjectUpload>>,
    chunk_len: usize,
    opened: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_chunk_len(DEFAULT_CHUNK_LEN)
    }

    /// Serves reads in chunks of `chunk_len` bytes.
    pub fn with_chunk_len(chunk_len: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            chunk_len: chunk_len.max(1),
            opened: AtomicUsize::new(0),
        }
    }

    /// Number of successful `get` calls so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, ObjectUpload>> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, ObjectUpload>> {
        self.objects.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, upload: ObjectUpload) -> Result<(), StoreError> {
        validate_key(key)?;
        self.write_map().insert(key.to_string(), upload);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        validate_key(key)?;
        let object = self
            .read_map()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        let data = object.data;
        let chunk_len = self.chunk_len;
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(chunk_len)
            .map(|start| Ok(data.slice(start..(start + chunk_len).min(data.len()))))
            .collect();

        Ok(StoredObject {
            content_type: object.content_type,
            content_length: data.len() as u64,
            body: stream::iter(chunks).boxed(),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        validate_key(prefix)?;
        Ok(self
            .read_map()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.write_map().remove(key);
        Ok(())
    }
}
