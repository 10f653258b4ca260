//! Intermediate results exchanged through the hub's temporary buckets.

use bytes::Bytes;
use tessera_crypto::seal_payload;

use crate::analysis::upload_to_analysis_bucket;
use crate::error::ServiceError;
use crate::hub::{BucketFile, BucketKind, BucketUpload};
use crate::peers::shared_key_with;
use crate::retrieval::{fetch, HubObjectSource, OpenedObject};
use crate::AppState;

#[derive(Debug, Clone)]
pub struct IntermediateUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
    /// Node the file is encrypted for. `None` uploads plaintext.
    pub remote_node_id: Option<String>,
}

/// Uploads an intermediate result into the caller's TEMP bucket.
pub async fn upload_intermediate(
    state: &AppState,
    client_id: &str,
    upload: IntermediateUpload,
) -> Result<BucketFile, ServiceError> {
    let data = match upload.remote_node_id.as_deref() {
        Some(node_id) => {
            let key = shared_key_with(state.hub.as_ref(), state.keys.as_ref(), node_id).await?;
            let plaintext = upload.data;
            let sealed = tokio::task::spawn_blocking(move || seal_payload(&key, &plaintext))
                .await
                .map_err(|e| ServiceError::Internal(format!("task join error: {}", e)))?
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
            tracing::debug!(node_id, bytes = sealed.len(), "encrypted intermediate result");
            Bytes::from(sealed)
        }
        None => upload.data,
    };

    upload_to_analysis_bucket(
        state.hub.as_ref(),
        client_id,
        BucketKind::Temp,
        BucketUpload {
            file_name: upload.file_name,
            content_type: upload.content_type,
            data,
        },
    )
    .await
}

/// Streams an intermediate result from the hub, decrypting it if it was
/// encrypted by `node_id` for this node.
pub async fn fetch_intermediate(
    state: &AppState,
    object_id: &str,
    node_id: Option<&str>,
) -> Result<OpenedObject, ServiceError> {
    if state.hub.bucket_file(object_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "Object with ID {object_id} does not exist"
        )));
    }

    let key = match node_id {
        Some(node_id) => {
            Some(shared_key_with(state.hub.as_ref(), state.keys.as_ref(), node_id).await?)
        }
        None => None,
    };

    let source = HubObjectSource {
        hub: state.hub.clone(),
        file_id: object_id.to_string(),
    };
    fetch(&source, key).await
}
