//! Reqwest-backed Storage API adapter.
//!
//! This adapter owns transport details only: the token header, form-encoded
//! request bodies, timeout and HTTP error mapping, and JSON decoding into the
//! port records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::dto::{FileResourceDto, JobDto, TokenDto};
use crate::domain::Credential;
use crate::domain::ports::{ProjectToken, StorageApi, StorageApiError, StorageJob, UploadTarget};

const TOKEN_HEADER: &str = "X-StorageApi-Token";

/// Storage API adapter bound to one host.
pub struct StorageApiHttpClient {
    client: Client,
    base_url: String,
}

impl StorageApiHttpClient {
    /// Build an adapter for `https://<host>/v2/storage` with a request timeout.
    /// ```rust,ignore
    /// let client = StorageApiHttpClient::new("connection.example.com", timeout)?;
    /// ```
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(host: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let base_url = format!("https://{}/v2/storage", host.trim_end_matches('/'));
        Self::with_base_url(base_url, timeout)
    }

    /// Build an adapter against an explicit base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn get(&self, credential: &Credential, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header(TOKEN_HEADER, credential.expose())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn post(&self, credential: &Credential, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header(TOKEN_HEADER, credential.expose())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, StorageApiError> {
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        decode(body.as_ref())
    }

    async fn exists(&self, request: RequestBuilder) -> Result<bool, StorageApiError> {
        let (status, body) = send(request).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            _ if status.is_success() => Ok(true),
            _ => Err(map_status_error(status, body.as_ref())),
        }
    }
}

#[async_trait]
impl StorageApi for StorageApiHttpClient {
    async fn verify_token(&self, credential: &Credential) -> Result<ProjectToken, StorageApiError> {
        let token: TokenDto = self.fetch(self.get(credential, "tokens/verify")).await?;
        Ok(token.into_domain())
    }

    async fn bucket_exists(
        &self,
        credential: &Credential,
        bucket_id: &str,
    ) -> Result<bool, StorageApiError> {
        self.exists(self.get(credential, &format!("buckets/{bucket_id}")))
            .await
    }

    async fn create_bucket(
        &self,
        credential: &Credential,
        name: &str,
        stage: &str,
        display_name: &str,
    ) -> Result<(), StorageApiError> {
        let request = self.post(credential, "buckets").form(&[
            ("name", name),
            ("stage", stage),
            ("displayName", display_name),
        ]);
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        debug!(bucket = name, stage, "bucket created");
        Ok(())
    }

    async fn table_exists(
        &self,
        credential: &Credential,
        table_id: &str,
    ) -> Result<bool, StorageApiError> {
        self.exists(self.get(credential, &format!("tables/{table_id}")))
            .await
    }

    async fn create_table_async(
        &self,
        credential: &Credential,
        bucket_id: &str,
        table_name: &str,
        file_id: i64,
    ) -> Result<StorageJob, StorageApiError> {
        let request = self
            .post(credential, &format!("buckets/{bucket_id}/tables-async"))
            .form(&[
                ("name", table_name.to_owned()),
                ("dataFileId", file_id.to_string()),
            ]);
        let job: JobDto = self.fetch(request).await?;
        Ok(job.into_domain())
    }

    async fn import_table_async(
        &self,
        credential: &Credential,
        table_id: &str,
        file_id: i64,
        incremental: bool,
    ) -> Result<StorageJob, StorageApiError> {
        let request = self
            .post(credential, &format!("tables/{table_id}/import-async"))
            .form(&[
                ("dataFileId", file_id.to_string()),
                ("incremental", u8::from(incremental).to_string()),
            ]);
        let job: JobDto = self.fetch(request).await?;
        Ok(job.into_domain())
    }

    async fn job_status(
        &self,
        credential: &Credential,
        job_id: i64,
    ) -> Result<StorageJob, StorageApiError> {
        let job: JobDto = self
            .fetch(self.get(credential, &format!("jobs/{job_id}")))
            .await?;
        Ok(job.into_domain())
    }

    async fn prepare_file(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<UploadTarget, StorageApiError> {
        let request = self
            .post(credential, "files/prepare")
            .form(&[("name", name), ("federationToken", "1")]);
        let file: FileResourceDto = self.fetch(request).await?;
        file.into_domain()
    }
}

async fn send(request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), StorageApiError> {
    let response = request.send().await.map_err(map_transport_error)?;
    let status = response.status();
    let body = response.bytes().await.map_err(map_transport_error)?;
    Ok((status, body.to_vec()))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, StorageApiError> {
    serde_json::from_slice(body).map_err(|error| {
        StorageApiError::decode(format!("invalid Storage API JSON payload: {error}"))
    })
}

fn map_transport_error(error: reqwest::Error) -> StorageApiError {
    if error.is_timeout() {
        StorageApiError::timeout(error.to_string())
    } else {
        StorageApiError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> StorageApiError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageApiError::unauthorized(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            StorageApiError::timeout(message)
        }
        _ => StorageApiError::status(status.as_u16(), message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
