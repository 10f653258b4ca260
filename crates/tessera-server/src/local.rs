//! Results kept in the local object store and tracked in the tag ledger.

use bytes::Bytes;
use serde::Serialize;
use tessera_ledger::{
    find_result, is_valid_tag, list_tagged_results, list_tags, purge_project, tag_object,
    PurgeSummary, StoredResult, Tag, TagRequest,
};
use uuid::Uuid;

use crate::analysis::project_for_analysis;
use crate::error::{with_connection, ServiceError};
use crate::hub::BucketFile;
use crate::intermediate::{upload_intermediate, IntermediateUpload};
use crate::objects::{
    object_key, project_prefix, read_to_end, ObjectUpload, DEFAULT_CONTENT_TYPE,
};
use crate::retrieval::{fetch, LocalObjectSource, OpenedObject};
use crate::AppState;

/// A file to keep locally.
#[derive(Debug, Clone)]
pub struct LocalUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
    /// Tag to file the object under right away.
    pub tag: Option<String>,
}

/// What a project deletion removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectDeletion {
    pub objects_removed: usize,
    pub results_deleted: usize,
    pub tags_deleted: usize,
}

/// Stores an upload under a fresh object id, tagging it if requested.
///
/// The tag is validated before anything is written. The bytes are written
/// before the ledger rows, so a failed tagging leaves at most an untagged
/// object, never a ledger row without bytes.
pub async fn upload_local(
    state: &AppState,
    client_id: &str,
    upload: LocalUpload,
) -> Result<String, ServiceError> {
    let project_id = project_for_analysis(state.hub.as_ref(), client_id).await?;

    if let Some(tag) = upload.tag.as_deref() {
        if !is_valid_tag(tag) {
            return Err(ServiceError::InvalidInput(format!("Invalid tag `{tag}`")));
        }
    }

    let object_id = Uuid::new_v4().to_string();
    state
        .objects
        .put(
            &object_key(&project_id, &object_id),
            ObjectUpload {
                content_type: upload
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                data: upload.data,
            },
        )
        .await?;

    tracing::info!(client_id, project_id = %project_id, object_id = %object_id, "stored local result");

    if let Some(tag_name) = upload.tag {
        let request = TagRequest {
            tag_name,
            project_id,
            client_id: client_id.to_string(),
            object_id: object_id.clone(),
            filename: upload.file_name,
        };
        with_connection(&state.pool, move |conn| Ok(tag_object(conn, &request)?)).await?;
    }

    Ok(object_id)
}

/// Opens a local result of the caller's project.
pub async fn fetch_local(
    state: &AppState,
    client_id: &str,
    object_id: &str,
) -> Result<OpenedObject, ServiceError> {
    let project_id = project_for_analysis(state.hub.as_ref(), client_id).await?;
    let source = LocalObjectSource {
        store: state.objects.clone(),
        key: object_key(&project_id, object_id),
    };
    fetch(&source, None).await
}

/// Tags an object that already exists in the caller's project.
pub async fn tag_existing_object(
    state: &AppState,
    client_id: &str,
    tag_name: &str,
    object_id: &str,
    filename: Option<String>,
) -> Result<StoredResult, ServiceError> {
    let project_id = project_for_analysis(state.hub.as_ref(), client_id).await?;

    // Existence check only; the read handle is dropped straight away.
    drop(state.objects.get(&object_key(&project_id, object_id)).await?);

    let request = TagRequest {
        tag_name: tag_name.to_string(),
        project_id,
        client_id: client_id.to_string(),
        object_id: object_id.to_string(),
        filename,
    };
    with_connection(&state.pool, move |conn| Ok(tag_object(conn, &request)?)).await
}

/// Tags of the caller's project.
pub async fn project_tags(state: &AppState, client_id: &str) -> Result<Vec<Tag>, ServiceError> {
    let project_id = project_for_analysis(state.hub.as_ref(), client_id).await?;
    with_connection(&state.pool, move |conn| Ok(list_tags(conn, &project_id)?)).await
}

/// Results filed under `tag_name` in the caller's project.
pub async fn tagged_results(
    state: &AppState,
    client_id: &str,
    tag_name: &str,
) -> Result<Vec<StoredResult>, ServiceError> {
    let project_id = project_for_analysis(state.hub.as_ref(), client_id).await?;
    let tag_name = tag_name.to_string();
    with_connection(&state.pool, move |conn| {
        Ok(list_tagged_results(conn, &project_id, &tag_name)?)
    })
    .await
}

/// Removes every local result and ledger row of a project that no longer
/// exists on the hub.
///
/// Only the administrative client may do this. Objects are removed first and
/// ledger rows second; nothing is removed if either check fails.
pub async fn delete_project_results(
    state: &AppState,
    client_id: &str,
    project_id: &str,
) -> Result<ProjectDeletion, ServiceError> {
    if client_id != state.admin_client_id {
        return Err(ServiceError::Forbidden(format!(
            "Only the Hub Adapter client is allowed to delete local results, got client ID '{client_id}'."
        )));
    }

    if state.hub.project_exists(project_id).await? {
        return Err(ServiceError::InvalidInput(format!(
            "Project '{project_id}' will not be deleted because it is still available on the Hub."
        )));
    }

    let keys = state.objects.list(&project_prefix(project_id)).await?;
    let mut object_ids = Vec::with_capacity(keys.len());
    for key in &keys {
        state.objects.remove(key).await?;
        if let Some(object_id) = key.rsplit('/').next() {
            object_ids.push(object_id.to_string());
        }
    }

    let project = project_id.to_string();
    let summary: PurgeSummary = with_connection(&state.pool, move |conn| {
        Ok(purge_project(conn, &project, &object_ids)?)
    })
    .await?;

    tracing::info!(
        project_id,
        objects = keys.len(),
        results = summary.results_deleted,
        tags = summary.tags_deleted,
        "deleted local project results"
    );

    Ok(ProjectDeletion {
        objects_removed: keys.len(),
        results_deleted: summary.results_deleted,
        tags_deleted: summary.tags_deleted,
    })
}

/// Sends a local result to the hub as an intermediate result, optionally
/// encrypted for `remote_node_id`.
///
/// The uploaded file keeps the filename recorded in the ledger, or the
/// object id if the object was never tagged.
pub async fn forward_local_to_hub(
    state: &AppState,
    client_id: &str,
    object_id: &str,
    remote_node_id: Option<String>,
) -> Result<BucketFile, ServiceError> {
    let project_id = project_for_analysis(state.hub.as_ref(), client_id).await?;
    let object = state.objects.get(&object_key(&project_id, object_id)).await?;
    let content_type = object.content_type;
    let data = read_to_end(object.body).await.map_err(|e| {
        tracing::error!(object_id, error = %e, "failed to read local object");
        ServiceError::UpstreamUnavailable("Unexpected error from object store".to_string())
    })?;

    let lookup = (object_id.to_string(), client_id.to_string());
    let recorded = with_connection(&state.pool, move |conn| {
        Ok(find_result(conn, &lookup.0, &lookup.1)?)
    })
    .await?;
    let file_name = recorded
        .map(|result| result.filename)
        .unwrap_or_else(|| object_id.to_string());

    upload_intermediate(
        state,
        client_id,
        IntermediateUpload {
            file_name,
            content_type,
            data,
            remote_node_id,
        },
    )
    .await
}
