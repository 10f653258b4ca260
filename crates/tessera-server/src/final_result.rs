//! Final results, uploaded to the caller's RESULT bucket.

use crate::analysis::upload_to_analysis_bucket;
use crate::error::ServiceError;
use crate::hub::{BucketFile, BucketKind, BucketUpload};
use crate::AppState;

pub async fn upload_final(
    state: &AppState,
    client_id: &str,
    upload: BucketUpload,
) -> Result<BucketFile, ServiceError> {
    upload_to_analysis_bucket(state.hub.as_ref(), client_id, BucketKind::Result, upload).await
}
