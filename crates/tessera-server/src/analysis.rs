//! Hub lookups scoped to the calling analysis.

use crate::error::ServiceError;
use crate::hub::{BucketFile, BucketFileLink, BucketKind, BucketUpload, Hub};

/// Resolves the project an analysis belongs to.
pub async fn project_for_analysis(hub: &dyn Hub, analysis_id: &str) -> Result<String, ServiceError> {
    hub.analysis(analysis_id)
        .await?
        .map(|analysis| analysis.project_id)
        .ok_or_else(|| ServiceError::NotFound(format!("Analysis with ID {analysis_id} not found")))
}

/// Uploads a file into the analysis bucket of `kind` and links it to the
/// analysis.
///
/// The storage service must answer with exactly one file; anything else is
/// treated as an upstream failure.
pub async fn upload_to_analysis_bucket(
    hub: &dyn Hub,
    analysis_id: &str,
    kind: BucketKind,
    upload: BucketUpload,
) -> Result<BucketFile, ServiceError> {
    let bucket = hub
        .analysis_buckets(analysis_id, kind)
        .await?
        .pop()
        .ok_or_else(|| {
            let label = match kind {
                BucketKind::Result => "Result",
                BucketKind::Temp => "Temp",
            };
            ServiceError::NotFound(format!(
                "{label} bucket for analysis with ID {analysis_id} was not found"
            ))
        })?;

    let mut files = hub.upload_to_bucket(&bucket.bucket_id, upload).await?;
    if files.len() != 1 {
        return Err(ServiceError::UpstreamUnavailable(format!(
            "Expected single uploaded file to be returned by storage service, got {}",
            files.len()
        )));
    }
    let file = files.remove(0);

    hub.link_bucket_file(&BucketFileLink {
        path: file.name.clone(),
        bucket_file_id: file.id.clone(),
        analysis_bucket_id: bucket.id.clone(),
        bucket_id: bucket.bucket_id.clone(),
    })
    .await?;

    tracing::info!(
        analysis_id,
        bucket = kind.as_str(),
        file_id = %file.id,
        "uploaded file to analysis bucket"
    );

    Ok(file)
}
