//! HTTP client for the hub's core, storage and auth services.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    Analysis, AnalysisBucket, BucketFile, BucketFileLink, BucketKind, BucketUpload, Hub,
    HubError, Node,
};
use crate::objects::ByteStream;
use crate::outbound::OutboundHttp;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens are refreshed this long before the hub says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Credentials used to obtain hub access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "flow", rename_all = "lowercase")]
pub enum HubAuth {
    /// Robot (client credentials) flow.
    Client { id: String, secret: String },
    /// Resource owner password flow.
    Password { username: String, password: String },
}

#[derive(Serialize)]
#[serde(tag = "grant_type")]
enum TokenRequest<'a> {
    #[serde(rename = "robot_credentials")]
    Robot { id: &'a str, secret: &'a str },
    #[serde(rename = "password")]
    Password {
        username: &'a str,
        password: &'a str,
    },
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Collection responses are wrapped in a `data` envelope.
#[derive(Deserialize)]
struct Collection<T> {
    data: Vec<T>,
}

/// Hub client over HTTP.
pub struct HttpHub {
    client: reqwest::Client,
    core_base_url: String,
    storage_base_url: String,
    auth_base_url: String,
    auth: HubAuth,
    // Only held for short synchronous sections, never across an await.
    token: Mutex<Option<CachedToken>>,
}

impl HttpHub {
    pub fn new(
        core_base_url: &str,
        storage_base_url: &str,
        auth_base_url: &str,
        auth: HubAuth,
        outbound: &OutboundHttp,
    ) -> Result<Self, HubError> {
        let client = outbound
            .client_builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tessera-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            core_base_url: core_base_url.trim_end_matches('/').to_string(),
            storage_base_url: storage_base_url.trim_end_matches('/').to_string(),
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            auth,
            token: Mutex::new(None),
        })
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock().unwrap_or_else(|poisoned| {
            tracing::error!("hub token cache lock poisoned, recovering");
            poisoned.into_inner()
        });
        guard
            .as_ref()
            .filter(|token| Instant::now() < token.refresh_at)
            .map(|token| token.value.clone())
    }

    async fn access_token(&self) -> Result<String, HubError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let request = match &self.auth {
            HubAuth::Client { id, secret } => TokenRequest::Robot { id, secret },
            HubAuth::Password { username, password } => {
                TokenRequest::Password { username, password }
            }
        };
        let url = format!("{}/token", self.auth_base_url);
        let response = self.client.post(&url).json(&request).send().await?;
        let token: TokenResponse = expect_success(response).await?.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let mut guard = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "obtained hub access token");

        Ok(token.access_token)
    }

    async fn get(&self, url: &str) -> Result<Response, HubError> {
        let token = self.access_token().await?;
        Ok(self.client.get(url).bearer_auth(token).send().await?)
    }

    /// GETs a single entity, mapping 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, HubError> {
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entity = expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| HubError::UnexpectedShape(format!("{url}: {e}")))?;
        Ok(Some(entity))
    }
}

async fn expect_success(response: Response) -> Result<Response, HubError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(HubError::UnexpectedStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl Hub for HttpHub {
    async fn analysis(&self, analysis_id: &str) -> Result<Option<Analysis>, HubError> {
        self.get_optional(&format!("{}/analyses/{analysis_id}", self.core_base_url))
            .await
    }

    async fn project_exists(&self, project_id: &str) -> Result<bool, HubError> {
        let project: Option<serde_json::Value> = self
            .get_optional(&format!("{}/projects/{project_id}", self.core_base_url))
            .await?;
        Ok(project.is_some())
    }

    async fn node(&self, node_id: &str) -> Result<Option<Node>, HubError> {
        self.get_optional(&format!("{}/nodes/{node_id}", self.core_base_url))
            .await
    }

    async fn analysis_buckets(
        &self,
        analysis_id: &str,
        kind: BucketKind,
    ) -> Result<Vec<AnalysisBucket>, HubError> {
        let url = format!("{}/analysis-buckets", self.core_base_url);
        let token = self.access_token().await?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("filter[analysis_id]", analysis_id),
                ("filter[type]", kind.as_str()),
            ])
            .send()
            .await?;

        let buckets: Collection<AnalysisBucket> = expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| HubError::UnexpectedShape(format!("{url}: {e}")))?;
        Ok(buckets.data)
    }

    async fn upload_to_bucket(
        &self,
        bucket_id: &str,
        upload: BucketUpload,
    ) -> Result<Vec<BucketFile>, HubError> {
        let url = format!("{}/buckets/{bucket_id}/upload", self.storage_base_url);
        let part = reqwest::multipart::Part::bytes(upload.data.to_vec())
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let token = self.access_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let files: Collection<BucketFile> = expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| HubError::UnexpectedShape(format!("{url}: {e}")))?;
        Ok(files.data)
    }

    async fn link_bucket_file(&self, link: &BucketFileLink) -> Result<(), HubError> {
        let url = format!("{}/analysis-bucket-files", self.core_base_url);
        let token = self.access_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(link)
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn bucket_file(&self, file_id: &str) -> Result<Option<BucketFile>, HubError> {
        self.get_optional(&format!("{}/bucket-files/{file_id}", self.storage_base_url))
            .await
    }

    async fn stream_bucket_file(&self, file_id: &str) -> Result<ByteStream, HubError> {
        let url = format!("{}/bucket-files/{file_id}/stream", self.storage_base_url);
        let response = expect_success(self.get(&url).await?).await?;
        Ok(response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed())
    }
}
