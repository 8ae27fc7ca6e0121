//! Client for the Yandex Disk REST API.
//!
//! Only the handful of resource endpoints the export workflow needs:
//! folder creation, upload/download links, publishing and metadata.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::YandexConfig;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("Directory creation failed: status={status}, body={body}")]
    DirectoryCreation { status: StatusCode, body: String },

    #[error("Failed to get upload URL: {0}")]
    UploadUrl(String),

    #[error("File upload failed: {0}")]
    Upload(String),

    #[error("Failed to publish file: {0}")]
    Publish(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Invalid Disk API response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DiskError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Remote file storage used by the upload workflow.
///
/// Every call takes the acting identity's OAuth token; implementations hold no
/// per-user state.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Creates a folder. An already existing folder is not an error.
    async fn ensure_directory(&self, token: &str, path: &str) -> Result<(), DiskError>;

    /// Requests a one-time upload target for `path`.
    async fn get_upload_url(
        &self,
        token: &str,
        path: &str,
        overwrite: bool,
    ) -> Result<String, DiskError>;

    async fn upload_bytes(&self, token: &str, upload_url: &str, bytes: &[u8])
    -> Result<(), DiskError>;

    /// Makes the file publicly readable and returns its public link.
    async fn publish(&self, token: &str, path: &str) -> Result<String, DiskError>;

    /// Public link of an already published resource, if any.
    async fn public_url(&self, token: &str, path: &str) -> Result<Option<String>, DiskError>;

    async fn get_download_url(&self, token: &str, path: &str) -> Result<String, DiskError>;

    async fn download_bytes(&self, token: &str, download_url: &str) -> Result<Vec<u8>, DiskError>;

    /// Fetches a published file through its public link.
    async fn download_public(&self, public_key: &str) -> Result<Vec<u8>, DiskError>;

    async fn download(&self, token: &str, path: &str) -> Result<Vec<u8>, DiskError> {
        let href = self.get_download_url(token, path).await?;
        self.download_bytes(token, &href).await
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ResourceMeta {
    #[serde(default)]
    public_url: Option<String>,
}

#[derive(Clone)]
pub struct YandexDiskClient {
    client: Client,
    api_url: String,
    public_disk_url: String,
}

impl YandexDiskClient {
    #[must_use]
    pub fn with_shared_client(client: Client, config: &YandexConfig) -> Self {
        Self {
            client,
            api_url: config.disk_api_url.trim_end_matches('/').to_string(),
            public_disk_url: config.public_disk_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, resource: &str, params: &[(&str, &str)]) -> Result<Url, DiskError> {
        let mut url = Url::parse(&format!("{}{resource}", self.api_url))
            .map_err(|e| DiskError::InvalidResponse(format!("Bad Disk API URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorized(builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("Authorization", format!("OAuth {token}"))
            .header("Accept", "application/json")
    }

    /// Deterministic browser link used when the API does not report one.
    #[must_use]
    pub fn fallback_public_url(&self, path: &str) -> String {
        format!("{}{path}", self.public_disk_url)
    }

    async fn fetch_link(&self, builder: RequestBuilder) -> Result<Result<String, (StatusCode, String)>, DiskError> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(Err((status, body)));
        }

        let link: Link = response
            .json()
            .await
            .map_err(|e| DiskError::InvalidResponse(format!("Missing href: {e}")))?;
        Ok(Ok(link.href))
    }
}

#[async_trait]
impl RemoteStorage for YandexDiskClient {
    async fn ensure_directory(&self, token: &str, path: &str) -> Result<(), DiskError> {
        let url = self.endpoint("/resources", &[("path", path)])?;

        let response = Self::authorized(self.client.put(url), token).send().await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::CONFLICT {
            debug!(path, %status, "Disk directory ready");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DiskError::DirectoryCreation { status, body })
    }

    async fn get_upload_url(
        &self,
        token: &str,
        path: &str,
        overwrite: bool,
    ) -> Result<String, DiskError> {
        let overwrite = if overwrite { "true" } else { "false" };
        let url = self.endpoint(
            "/resources/upload",
            &[("path", path), ("overwrite", overwrite)],
        )?;

        self.fetch_link(Self::authorized(self.client.get(url), token))
            .await?
            .map_err(|(status, body)| DiskError::UploadUrl(format!("status={status}, body={body}")))
    }

    async fn upload_bytes(
        &self,
        token: &str,
        upload_url: &str,
        bytes: &[u8],
    ) -> Result<(), DiskError> {
        let response = self
            .client
            .put(upload_url)
            .header("Authorization", format!("OAuth {token}"))
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(size = bytes.len(), "Uploaded file bytes");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DiskError::Upload(format!("status={status}, body={body}")))
        }
    }

    async fn publish(&self, token: &str, path: &str) -> Result<String, DiskError> {
        let url = self.endpoint("/resources/publish", &[("path", path)])?;

        let response = Self::authorized(self.client.put(url), token)
            .send()
            .await
            .map_err(|e| DiskError::Publish(e.to_string()))?;

        if !response.status().is_success() {
            debug!(path, status = %response.status(), "Publish request was not accepted");
        }

        let public_url = self.public_url(token, path).await.unwrap_or_else(|e| {
            debug!(path, error = %e, "Metadata lookup after publish failed");
            None
        });

        Ok(public_url.unwrap_or_else(|| self.fallback_public_url(path)))
    }

    async fn public_url(&self, token: &str, path: &str) -> Result<Option<String>, DiskError> {
        let url = self.endpoint("/resources", &[("path", path), ("fields", "public_url")])?;

        let response = Self::authorized(self.client.get(url), token).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(DiskError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiskError::InvalidResponse(format!(
                "metadata status={status}, body={body}"
            )));
        }

        let meta: ResourceMeta = response
            .json()
            .await
            .map_err(|e| DiskError::InvalidResponse(e.to_string()))?;
        Ok(meta.public_url.filter(|url| !url.is_empty()))
    }

    async fn get_download_url(&self, token: &str, path: &str) -> Result<String, DiskError> {
        let url = self.endpoint("/resources/download", &[("path", path)])?;

        self.fetch_link(Self::authorized(self.client.get(url), token))
            .await?
            .map_err(|(status, body)| {
                if status == StatusCode::NOT_FOUND {
                    DiskError::NotFound(path.to_string())
                } else {
                    DiskError::Download(format!("status={status}, body={body}"))
                }
            })
    }

    async fn download_bytes(&self, token: &str, download_url: &str) -> Result<Vec<u8>, DiskError> {
        let response = self
            .client
            .get(download_url)
            .header("Authorization", format!("OAuth {token}"))
            .send()
            .await?;

        read_file_body(response, download_url).await
    }

    async fn download_public(&self, public_key: &str) -> Result<Vec<u8>, DiskError> {
        let url = self.endpoint("/public/resources/download", &[("public_key", public_key)])?;

        let href = self
            .fetch_link(self.client.get(url).header("Accept", "application/json"))
            .await?
            .map_err(|(status, body)| {
                if status == StatusCode::NOT_FOUND {
                    DiskError::NotFound(public_key.to_string())
                } else {
                    DiskError::Download(format!("status={status}, body={body}"))
                }
            })?;

        let response = self.client.get(&href).send().await?;
        read_file_body(response, &href).await
    }
}

async fn read_file_body(response: reqwest::Response, source: &str) -> Result<Vec<u8>, DiskError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(DiskError::NotFound(source.to_string()));
    }
    if !status.is_success() {
        return Err(DiskError::Download(format!("status={status}")));
    }

    Ok(response.bytes().await?.to_vec())
}
