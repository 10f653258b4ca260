//! Service-level error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tessera_db::DbPool;
use tessera_ledger::LedgerError;
use thiserror::Error;

use crate::hub::HubError;
use crate::objects::StoreError;

/// Errors surfaced by orchestrators and handlers.
///
/// The message is returned to the caller as `{"error": message}`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    /// The first unit of an encrypted object did not authenticate.
    #[error("{0}")]
    DecryptionNotPossible(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    /// Hub, object store, relational store or identity provider failed or
    /// answered unexpectedly.
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidInput(_)
            | ServiceError::DecryptionNotPossible(_)
            | ServiceError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidTag(_) => ServiceError::InvalidInput(e.to_string()),
            LedgerError::FilenameConflict { .. } => ServiceError::Conflict(e.to_string()),
            LedgerError::Database(_) => {
                tracing::error!(error = %e, "relational store failure");
                ServiceError::UpstreamUnavailable(
                    "Unexpected error from relational store".to_string(),
                )
            }
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => {
                let object_id = key.rsplit('/').next().unwrap_or(&key);
                ServiceError::NotFound(format!("Object with ID {object_id} does not exist"))
            }
            StoreError::InvalidKey(_) => ServiceError::InvalidInput(e.to_string()),
            StoreError::Io(_) | StoreError::Metadata(_) => {
                tracing::error!(error = %e, "object store failure");
                ServiceError::UpstreamUnavailable("Unexpected error from object store".to_string())
            }
        }
    }
}

impl From<HubError> for ServiceError {
    fn from(e: HubError) -> Self {
        tracing::error!(error = %e, "hub request failed");
        ServiceError::UpstreamUnavailable(format!("Hub is unavailable: {e}"))
    }
}

/// Runs blocking database work on the blocking thread pool.
pub(crate) async fn with_connection<F, T>(pool: &DbPool, f: F) -> Result<T, ServiceError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "no relational store connection available");
            ServiceError::UpstreamUnavailable("Relational store is unavailable".to_string())
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("task join error: {}", e)))?
}
