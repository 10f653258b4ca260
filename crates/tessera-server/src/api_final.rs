//! Handler for `/final`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart},
    http::StatusCode,
};

use crate::api::UploadForm;
use crate::error::ServiceError;
use crate::final_result::upload_final;
use crate::hub::BucketUpload;
use crate::middleware::ClientIdentity;
use crate::objects::DEFAULT_CONTENT_TYPE;
use crate::AppState;

/// Handler for `PUT /final`. Answers 204 once the file is linked.
pub async fn upload_final_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ClientIdentity(client_id)): Extension<ClientIdentity>,
    multipart: Multipart,
) -> Result<StatusCode, ServiceError> {
    let file = UploadForm::read(multipart).await?.take_file()?;

    upload_final(
        &state,
        &client_id,
        BucketUpload {
            file_name: file.file_name.unwrap_or_else(|| "data.bin".to_string()),
            content_type: file
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            data: file.data,
        },
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
