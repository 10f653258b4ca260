//! Request and response plumbing shared by the route handlers.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::Multipart,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::objects::DEFAULT_CONTENT_TYPE;
use crate::retrieval::OpenedObject;

/// Response for uploads that produce a retrievable object.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub object_id: String,
}

/// The `file` part of a multipart upload.
#[derive(Debug)]
pub(crate) struct FilePart {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A parsed multipart form: the `file` part, if any, and every text field.
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub file: Option<FilePart>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub(crate) async fn read(mut multipart: Multipart) -> Result<Self, ServiceError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServiceError::InvalidInput(format!("multipart error: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::InvalidInput(format!("failed to read file: {}", e)))?;
                form.file = Some(FilePart {
                    file_name,
                    content_type,
                    data,
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::InvalidInput(format!("invalid field `{name}`: {e}")))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// A text field, treating an empty value as absent.
    pub(crate) fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub(crate) fn take_file(&mut self) -> Result<FilePart, ServiceError> {
        self.file
            .take()
            .ok_or_else(|| ServiceError::InvalidInput("missing multipart field `file`".to_string()))
    }
}

/// Normalizes an object id, rejecting anything that is not a UUID.
pub(crate) fn parse_object_id(raw: &str) -> Result<String, ServiceError> {
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| ServiceError::InvalidInput(format!("`{raw}` is not a valid object ID")))
}

/// Absolute link to `path` under the configured public base URL.
pub(crate) fn public_link(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Streams an object back to the caller.
pub(crate) fn stream_response(object: OpenedObject) -> Response {
    let content_type = object
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    (
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(object.body),
    )
        .into_response()
}
