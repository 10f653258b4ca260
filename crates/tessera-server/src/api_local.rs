//! Handlers for `/local`: results kept in this node's object store.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path, Query},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::{parse_object_id, public_link, stream_response, UploadForm, UploadResponse};
use crate::error::ServiceError;
use crate::local::{self, LocalUpload, ProjectDeletion};
use crate::middleware::ClientIdentity;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteLocalQuery {
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TagObjectQuery {
    pub tag_name: String,
    pub object_id: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForwardQuery {
    pub object_id: String,
}

#[derive(Debug, Serialize)]
pub struct TagLink {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TagListResponse {
    pub tags: Vec<TagLink>,
}

#[derive(Debug, Serialize)]
pub struct TaggedResultLink {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TaggedResultListResponse {
    pub results: Vec<TaggedResultLink>,
}

fn object_link(state: &AppState, object_id: &str) -> String {
    public_link(&state.public_url, &format!("local/{object_id}"))
}

/// Handler for `PUT /local`.
pub async fn upload_local_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let mut form = UploadForm::read(multipart).await?;
    let tag = form.field("tag");
    let file = form.take_file()?;

    let object_id = local::upload_local(
        &state,
        &client_id,
        LocalUpload {
            file_name: file.file_name,
            content_type: file.content_type,
            data: file.data,
            tag,
        },
    )
    .await?;

    Ok(Json(UploadResponse {
        url: object_link(&state, &object_id),
        object_id,
    }))
}

/// Handler for `DELETE /local?project_id=`.
pub async fn delete_local_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    Query(query): Query<DeleteLocalQuery>,
) -> Result<Json<ProjectDeletion>, ServiceError> {
    let deletion = local::delete_project_results(&state, &client_id, &query.project_id).await?;
    Ok(Json(deletion))
}

/// Handler for `GET /local/tags`.
pub async fn list_tags_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
) -> Result<Json<TagListResponse>, ServiceError> {
    let tags = local::project_tags(&state, &client_id).await?;

    Ok(Json(TagListResponse {
        tags: tags
            .into_iter()
            .map(|tag| TagLink {
                url: public_link(&state.public_url, &format!("local/tags/{}", tag.tag_name)),
                name: tag.tag_name,
            })
            .collect(),
    }))
}

/// Handler for `POST /local/tags?tag_name=&object_id=&filename=`.
pub async fn tag_object_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    Query(query): Query<TagObjectQuery>,
) -> Result<Json<TaggedResultLink>, ServiceError> {
    let object_id = parse_object_id(&query.object_id)?;
    let result = local::tag_existing_object(
        &state,
        &client_id,
        &query.tag_name,
        &object_id,
        query.filename,
    )
    .await?;

    Ok(Json(TaggedResultLink {
        filename: result.filename,
        url: object_link(&state, &object_id),
    }))
}

/// Handler for `GET /local/tags/{tag_name}`.
pub async fn tagged_results_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    Path(tag_name): Path<String>,
) -> Result<Json<TaggedResultListResponse>, ServiceError> {
    let results = local::tagged_results(&state, &client_id, &tag_name).await?;

    Ok(Json(TaggedResultListResponse {
        results: results
            .into_iter()
            .map(|result| TaggedResultLink {
                url: object_link(&state, &result.object_id),
                filename: result.filename,
            })
            .collect(),
    }))
}

/// Handler for `GET /local/{object_id}`.
pub async fn get_local_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    Path(object_id): Path<String>,
) -> Result<Response, ServiceError> {
    let object_id = parse_object_id(&object_id)?;
    let object = local::fetch_local(&state, &client_id, &object_id).await?;
    Ok(stream_response(object))
}

/// Handler for `PUT /local/upload?object_id=`.
pub async fn forward_local_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    Query(query): Query<ForwardQuery>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let object_id = parse_object_id(&query.object_id)?;
    let form = UploadForm::read(multipart).await?;

    let file = local::forward_local_to_hub(
        &state,
        &client_id,
        &object_id,
        form.field("remote_node_id"),
    )
    .await?;

    Ok(Json(UploadResponse {
        url: public_link(&state.public_url, &format!("intermediate/{}", file.id)),
        object_id: file.id,
    }))
}
