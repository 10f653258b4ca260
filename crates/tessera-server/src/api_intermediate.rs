//! Handlers for `/intermediate`: results exchanged through the hub.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path, Query},
    response::Response,
    Json,
};
use serde::Deserialize;

use crate::api::{parse_object_id, public_link, stream_response, UploadForm, UploadResponse};
use crate::error::ServiceError;
use crate::intermediate::{self, IntermediateUpload};
use crate::middleware::ClientIdentity;
use crate::objects::DEFAULT_CONTENT_TYPE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct IntermediateQuery {
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Handler for `PUT /intermediate`.
pub async fn upload_intermediate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let mut form = UploadForm::read(multipart).await?;
    let remote_node_id = form.field("remote_node_id");
    let file = form.take_file()?;

    let uploaded = intermediate::upload_intermediate(
        &state,
        &client_id,
        IntermediateUpload {
            file_name: file.file_name.unwrap_or_else(|| "data.bin".to_string()),
            content_type: file
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            data: file.data,
            remote_node_id,
        },
    )
    .await?;

    Ok(Json(UploadResponse {
        url: public_link(&state.public_url, &format!("intermediate/{}", uploaded.id)),
        object_id: uploaded.id,
    }))
}

/// Handler for `GET /intermediate/{object_id}?node_id=`.
pub async fn get_intermediate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(object_id): Path<String>,
    Query(query): Query<IntermediateQuery>,
) -> Result<Response, ServiceError> {
    let object_id = parse_object_id(&object_id)?;
    let node_id = query.node_id.as_deref().filter(|id| !id.is_empty());
    let object = intermediate::fetch_intermediate(&state, &object_id, node_id).await?;
    Ok(stream_response(object))
}
