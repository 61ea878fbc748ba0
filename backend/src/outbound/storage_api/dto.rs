//! DTOs for decoding Storage API JSON responses.
//!
//! The adapter decodes into these transport DTOs first, then maps into the
//! port records in one pass.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::ports::{
    JobStatus, ProjectToken, StorageApiError, StorageJob, UploadCredentials, UploadTarget,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TokenDto {
    pub(super) owner: TokenOwnerDto,
    #[serde(default)]
    pub(super) is_master_token: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenOwnerDto {
    pub(super) id: i64,
    #[serde(default)]
    pub(super) name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct JobDto {
    pub(super) id: i64,
    pub(super) status: String,
    #[serde(default)]
    pub(super) results: Option<Value>,
    #[serde(default)]
    pub(super) error: Option<JobErrorDto>,
}

#[derive(Debug, Deserialize)]
pub(super) struct JobErrorDto {
    #[serde(default)]
    pub(super) message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileResourceDto {
    pub(super) id: i64,
    #[serde(default)]
    pub(super) region: Option<String>,
    #[serde(default)]
    pub(super) upload_params: Option<UploadParamsDto>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UploadParamsDto {
    #[serde(default)]
    pub(super) key: Option<String>,
    #[serde(default)]
    pub(super) bucket: Option<String>,
    #[serde(default)]
    pub(super) credentials: Option<CredentialsDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CredentialsDto {
    pub(super) access_key_id: String,
    pub(super) secret_access_key: String,
    pub(super) session_token: String,
    #[serde(default)]
    pub(super) expiration: String,
}

impl TokenDto {
    pub(super) fn into_domain(self) -> ProjectToken {
        ProjectToken {
            project_id: self.owner.id,
            project_name: self.owner.name,
            is_master: self.is_master_token,
        }
    }
}

impl JobDto {
    pub(super) fn into_domain(self) -> StorageJob {
        StorageJob {
            id: self.id,
            status: JobStatus::parse(&self.status),
            results: self.results.filter(|results| !results.is_null()),
            error_message: self.error.and_then(|error| error.message),
        }
    }
}

impl FileResourceDto {
    /// Federated file resources carry everything an S3 write needs; anything
    /// less is unusable for upload.
    pub(super) fn into_domain(self) -> Result<UploadTarget, StorageApiError> {
        let missing = |field: &str| {
            StorageApiError::decode(format!("file resource {} lacks {field}", self.id))
        };
        let region = self.region.clone().ok_or_else(|| missing("region"))?;
        let params = self
            .upload_params
            .as_ref()
            .ok_or_else(|| missing("uploadParams"))?;
        let bucket = params.bucket.clone().ok_or_else(|| missing("uploadParams.bucket"))?;
        let key = params.key.clone().ok_or_else(|| missing("uploadParams.key"))?;
        let credentials = params
            .credentials
            .as_ref()
            .ok_or_else(|| missing("uploadParams.credentials"))?;
        Ok(UploadTarget {
            file_id: self.id,
            region,
            bucket,
            key,
            credentials: UploadCredentials {
                access_key_id: credentials.access_key_id.clone(),
                secret_access_key: credentials.secret_access_key.clone(),
                session_token: credentials.session_token.clone(),
                expiration: credentials.expiration.clone(),
            },
        })
    }
}
