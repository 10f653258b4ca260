//! Client side of the federated hub: analyses, projects, nodes and bucket
//! storage.

mod http;
mod memory;

pub use http::{HttpHub, HubAuth};
pub use memory::MemoryHub;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::objects::ByteStream;

/// Errors talking to the hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("hub returned status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("unexpected hub response: {0}")]
    UnexpectedShape(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub project_id: String,
}

/// A registered node. `public_key` is the hex-encoded SPKI PEM of its ECDH
/// key, if it published one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Purpose of an analysis bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BucketKind {
    /// Final results.
    Result,
    /// Intermediate results exchanged between nodes.
    Temp,
}

impl BucketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Result => "RESULT",
            BucketKind::Temp => "TEMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisBucket {
    pub id: String,
    pub bucket_id: String,
    pub analysis_id: String,
    #[serde(rename = "type")]
    pub kind: BucketKind,
}

/// A file to upload into a bucket.
#[derive(Debug, Clone)]
pub struct BucketUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFile {
    pub id: String,
    pub name: String,
    pub bucket_id: String,
}

/// Links an uploaded bucket file to an analysis bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFileLink {
    pub path: String,
    pub bucket_file_id: String,
    pub analysis_bucket_id: String,
    pub bucket_id: String,
}

/// Operations the service needs from the hub.
///
/// Lookups return `Ok(None)` (or `Ok(false)`) when the hub reports the
/// entity as absent; every other failure is a [`HubError`].
#[async_trait]
pub trait Hub: Send + Sync {
    async fn analysis(&self, analysis_id: &str) -> Result<Option<Analysis>, HubError>;

    async fn project_exists(&self, project_id: &str) -> Result<bool, HubError>;

    async fn node(&self, node_id: &str) -> Result<Option<Node>, HubError>;

    async fn analysis_buckets(
        &self,
        analysis_id: &str,
        kind: BucketKind,
    ) -> Result<Vec<AnalysisBucket>, HubError>;

    /// Uploads one file; the hub answers with the files it created.
    async fn upload_to_bucket(
        &self,
        bucket_id: &str,
        upload: BucketUpload,
    ) -> Result<Vec<BucketFile>, HubError>;

    async fn link_bucket_file(&self, link: &BucketFileLink) -> Result<(), HubError>;

    async fn bucket_file(&self, file_id: &str) -> Result<Option<BucketFile>, HubError>;

    /// Opens a fresh read of a bucket file's bytes.
    async fn stream_bucket_file(&self, file_id: &str) -> Result<ByteStream, HubError>;
}
