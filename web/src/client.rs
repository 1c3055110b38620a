//! The client half of the web mirror: a `Datastore`-shaped facade
//! (`read`/`update`/`exists`/`delete`) driven entirely by `reqwest`, the way
//! `vaultree_web` expects any caller — local or remote — to see the same
//! four operations. Grounded in the reference workspace's `HttpImporter`
//! (`importers/http`), which drives the same client the same way: a shared
//! `reqwest::Client`, a base URL, and error mapping from HTTP status/JSON
//! bodies back into typed errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use vaultree_name::BlobName;

use crate::error::ErrorBody;

/// Deployable config for [`WebDatastoreClient`]: the server to dial and how
/// long to wait for it, in the style of the reference workspace's per-piece
/// config structs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebClientConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(thiserror::Error, Debug)]
pub enum WebClientError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("upload already in progress for: {0}")]
    UploadInProgress(String),
    #[error("unknown blob type")]
    UnknownBlobType,
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("invalid blob name: {0}")]
    InvalidBlobName(String),
    #[error("invalid client config: {0}")]
    InvalidConfig(String),
    #[error("server returned no multipart form field")]
    NoFormField,
    #[error("unexpected HTTP status {0}: {1}")]
    UnexpectedStatus(u16, String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type WebClientResult<T> = Result<T, WebClientError>;

/// A `Datastore`-shaped client over the HTTP mirror in [`crate::server`].
#[derive(Debug, Clone)]
pub struct WebDatastoreClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl WebDatastoreClient {
    pub fn new(base_url: reqwest::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn with_client(http: reqwest::Client, base_url: reqwest::Url) -> Self {
        Self { http, base_url }
    }

    pub fn from_config(config: WebClientConfig) -> WebClientResult<Self> {
        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| WebClientError::InvalidConfig(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, base_url })
    }

    fn blob_url(&self, name: &BlobName) -> reqwest::Url {
        self.base_url
            .join(&name.to_string())
            .expect("blob name is a valid URL path segment")
    }

    /// `GET`s a blob and copies its bytes into `sink`.
    pub async fn read(&self, name: &BlobName, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> WebClientResult<()> {
        let resp = self.http.get(self.blob_url(name)).send().await?;
        let resp = map_error(resp, name).await?;
        let bytes = resp.bytes().await?;
        sink.write_all(&bytes).await?;
        sink.flush().await?;
        Ok(())
    }

    /// `PUT`s `source`'s bytes as the new content for `name`.
    pub async fn update(&self, name: &BlobName, source: &mut (dyn AsyncRead + Send + Unpin)) -> WebClientResult<()> {
        let mut body = Vec::new();
        source.read_to_end(&mut body).await?;
        let resp = self
            .http
            .put(self.blob_url(name))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        map_error(resp, name).await?;
        Ok(())
    }

    /// `HEAD`s a blob, translating `200`/`404` into a boolean.
    pub async fn exists(&self, name: &BlobName) -> WebClientResult<bool> {
        let resp = self.http.head(self.blob_url(name)).send().await?;
        match resp.status() {
            reqwest::StatusCode::OK => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(WebClientError::UnexpectedStatus(status.as_u16(), String::new())),
        }
    }

    /// `DELETE`s a blob.
    pub async fn delete(&self, name: &BlobName) -> WebClientResult<()> {
        let resp = self.http.delete(self.blob_url(name)).send().await?;
        map_error(resp, name).await?;
        Ok(())
    }
}

/// Maps a non-2xx response into a [`WebClientError`], consuming the JSON
/// error body (when present) to recover the known wire error codes.
async fn map_error(resp: reqwest::Response, name: &BlobName) -> WebClientResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(WebClientError::NotFound(name.to_string()));
    }

    let status = resp.status().as_u16();
    let body_text = resp.text().await.unwrap_or_default();
    let parsed: Option<ErrorBody> = serde_json::from_str(&body_text).ok();

    match parsed {
        Some(body) => match crate::error::ErrorCode::from_str(&body.code) {
            Some(crate::error::ErrorCode::UnknownBlobType) => Err(WebClientError::UnknownBlobType),
            Some(crate::error::ErrorCode::ValidationFailed) => Err(WebClientError::ValidationFailed(body.message)),
            Some(crate::error::ErrorCode::InvalidBlobName) => Err(WebClientError::InvalidBlobName(body.message)),
            Some(crate::error::ErrorCode::UploadInProgress) => {
                Err(WebClientError::UploadInProgress(name.to_string()))
            }
            Some(crate::error::ErrorCode::NoFormField) => Err(WebClientError::NoFormField),
            None => Err(WebClientError::UnexpectedStatus(status, body.message)),
        },
        None => Err(WebClientError::UnexpectedStatus(status, body_text)),
    }
}
