//! Local filesystem object store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncReadExt;

use super::{validate_key, ObjectStore, ObjectUpload, StoreError, StoredObject};

/// Size of the chunks handed out when streaming a body file.
const READ_CHUNK_LEN: usize = 32 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMetadata {
    content_type: String,
    content_length: u64,
}

/// Filesystem-backed object store.
///
/// Structure: `{root}/objects/{key}` holds the bytes and
/// `{root}/metadata/{key}.json` the content type and length.
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    /// Creates the store at `root`, creating the directory layout if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("metadata")).await?;
        Ok(Self { root })
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join("metadata").join(format!("{key}.json"))
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(&self, key: &str, upload: ObjectUpload) -> Result<(), StoreError> {
        validate_key(key)?;

        let body_path = self.body_path(key);
        let metadata_path = self.metadata_path(key);
        ensure_parent(&body_path).await?;
        ensure_parent(&metadata_path).await?;

        let metadata = ObjectMetadata {
            content_type: upload.content_type,
            content_length: upload.data.len() as u64,
        };

        fs::write(&body_path, &upload.data).await?;
        fs::write(&metadata_path, serde_json::to_vec(&metadata)?).await?;

        tracing::debug!(key, bytes = metadata.content_length, "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        validate_key(key)?;

        let metadata: ObjectMetadata = match fs::read(self.metadata_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let file = match fs::File::open(self.body_path(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        // The file handle lives inside the stream state and is closed when
        // the stream ends, fails, or is dropped.
        let body = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; READ_CHUNK_LEN];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(file)))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed();

        Ok(StoredObject {
            content_type: metadata.content_type,
            content_length: metadata.content_length,
            body,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        validate_key(prefix)?;

        let objects_dir = self.root.join("objects");
        let mut keys = Vec::new();
        let mut pending = vec![(objects_dir, String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let key = format!("{key_prefix}{name}");
                if entry.file_type().await?.is_dir() {
                    let dir_key = format!("{key}/");
                    // Only descend into directories that can still match.
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), dir_key));
                    }
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;

        for path in [self.body_path(key), self.metadata_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(key, "removed object");
        Ok(())
    }
}
