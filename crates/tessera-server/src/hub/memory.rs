//! In-process hub for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use uuid::Uuid;

use super::{
    Analysis, AnalysisBucket, BucketFile, BucketFileLink, BucketKind, BucketUpload, Hub,
    HubError, Node,
};
use crate::objects::ByteStream;

const DEFAULT_CHUNK_LEN: usize = 16 * 1024;

#[derive(Default)]
struct HubState {
    analyses: HashMap<String, Analysis>,
    projects: HashSet<String>,
    nodes: HashMap<String, Node>,
    buckets: Vec<AnalysisBucket>,
    files: HashMap<String, (BucketFile, BucketUpload)>,
    links: Vec<BucketFileLink>,
}

/// Hub whose analyses, projects, nodes and buckets live in memory.
pub struct MemoryHub {
    state: Mutex<HubState>,
    chunk_len: usize,
    streams_opened: AtomicUsize,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_chunk_len(DEFAULT_CHUNK_LEN)
    }

    /// Streams bucket files in chunks of `chunk_len` bytes.
    pub fn with_chunk_len(chunk_len: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            chunk_len: chunk_len.max(1),
            streams_opened: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a project.
    pub fn add_project(&self, project_id: &str) {
        self.lock().projects.insert(project_id.to_string());
    }

    /// Forgets a project, as if it had been deleted on the hub.
    pub fn remove_project(&self, project_id: &str) {
        self.lock().projects.remove(project_id);
    }

    /// Registers an analysis (and its project).
    pub fn add_analysis(&self, analysis_id: &str, project_id: &str) {
        let mut state = self.lock();
        state.projects.insert(project_id.to_string());
        state.analyses.insert(
            analysis_id.to_string(),
            Analysis {
                id: analysis_id.to_string(),
                project_id: project_id.to_string(),
            },
        );
    }

    /// Registers a node with an optional hex-encoded public key.
    pub fn add_node(&self, node_id: &str, public_key: Option<String>) {
        self.lock().nodes.insert(
            node_id.to_string(),
            Node {
                id: node_id.to_string(),
                public_key,
            },
        );
    }

    /// Creates a bucket of `kind` for an analysis.
    pub fn add_bucket(&self, analysis_id: &str, kind: BucketKind) -> AnalysisBucket {
        let bucket = AnalysisBucket {
            id: Uuid::new_v4().to_string(),
            bucket_id: Uuid::new_v4().to_string(),
            analysis_id: analysis_id.to_string(),
            kind,
        };
        self.lock().buckets.push(bucket.clone());
        bucket
    }

    /// Stores a file directly, bypassing upload and linking.
    pub fn insert_file(&self, bucket_id: &str, upload: BucketUpload) -> BucketFile {
        let file = BucketFile {
            id: Uuid::new_v4().to_string(),
            name: upload.file_name.clone(),
            bucket_id: bucket_id.to_string(),
        };
        self.lock()
            .files
            .insert(file.id.clone(), (file.clone(), upload));
        file
    }

    /// The stored upload of a bucket file.
    pub fn file(&self, file_id: &str) -> Option<BucketUpload> {
        self.lock().files.get(file_id).map(|(_, upload)| upload.clone())
    }

    /// Every link created so far.
    pub fn links(&self) -> Vec<BucketFileLink> {
        self.lock().links.clone()
    }

    /// Number of bucket file streams opened so far.
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hub for MemoryHub {
    async fn analysis(&self, analysis_id: &str) -> Result<Option<Analysis>, HubError> {
        Ok(self.lock().analyses.get(analysis_id).cloned())
    }

    async fn project_exists(&self, project_id: &str) -> Result<bool, HubError> {
        Ok(self.lock().projects.contains(project_id))
    }

    async fn node(&self, node_id: &str) -> Result<Option<Node>, HubError> {
        Ok(self.lock().nodes.get(node_id).cloned())
    }

    async fn analysis_buckets(
        &self,
        analysis_id: &str,
        kind: BucketKind,
    ) -> Result<Vec<AnalysisBucket>, HubError> {
        Ok(self
            .lock()
            .buckets
            .iter()
            .filter(|b| b.analysis_id == analysis_id && b.kind == kind)
            .cloned()
            .collect())
    }

    async fn upload_to_bucket(
        &self,
        bucket_id: &str,
        upload: BucketUpload,
    ) -> Result<Vec<BucketFile>, HubError> {
        if !self.lock().buckets.iter().any(|b| b.bucket_id == bucket_id) {
            return Err(HubError::UnexpectedStatus {
                status: 404,
                url: format!("memory://buckets/{bucket_id}/upload"),
            });
        }
        Ok(vec![self.insert_file(bucket_id, upload)])
    }

    async fn link_bucket_file(&self, link: &BucketFileLink) -> Result<(), HubError> {
        let mut state = self.lock();
        if !state.files.contains_key(&link.bucket_file_id) {
            return Err(HubError::UnexpectedShape(format!(
                "bucket file {} does not exist",
                link.bucket_file_id
            )));
        }
        state.links.push(link.clone());
        Ok(())
    }

    async fn bucket_file(&self, file_id: &str) -> Result<Option<BucketFile>, HubError> {
        Ok(self.lock().files.get(file_id).map(|(file, _)| file.clone()))
    }

    async fn stream_bucket_file(&self, file_id: &str) -> Result<ByteStream, HubError> {
        let data: Bytes = self
            .lock()
            .files
            .get(file_id)
            .map(|(_, upload)| upload.data.clone())
            .ok_or_else(|| HubError::UnexpectedStatus {
                status: 404,
                url: format!("memory://bucket-files/{file_id}/stream"),
            })?;
        self.streams_opened.fetch_add(1, Ordering::SeqCst);

        let chunk_len = self.chunk_len;
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(chunk_len)
            .map(|start| Ok(data.slice(start..(start + chunk_len).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
