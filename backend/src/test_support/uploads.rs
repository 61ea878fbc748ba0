//! Uploader and staging doubles.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::lock;
use crate::domain::BufferedRow;
use crate::domain::ports::{
    FileUploader, RowSink, StagingArea, StagingArtifact, StagingError, UploadError, UploadTarget,
};

/// Upload captured by [`RecordingUploader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    /// Local artifact path at upload time.
    pub path: PathBuf,
    /// Artifact contents read during the upload.
    pub contents: String,
    /// Target file id.
    pub file_id: i64,
    /// Target object key.
    pub key: String,
}

/// Uploader that reads the artifact into memory instead of sending it.
#[derive(Default)]
pub struct RecordingUploader {
    uploads: Mutex<Vec<RecordedUpload>>,
    failure: Mutex<Option<UploadError>>,
    gate: Option<Arc<Notify>>,
}

impl RecordingUploader {
    /// Uploader accepting every file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upload with `error` until [`Self::recover`] is called.
    pub fn failing(error: UploadError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    /// Hold each upload until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Stop failing uploads.
    pub fn recover(&self) {
        lock(&self.failure).take();
    }

    /// Uploads received so far.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        lock(&self.uploads).clone()
    }
}

#[async_trait]
impl FileUploader for RecordingUploader {
    async fn upload(&self, path: &Path, target: &UploadTarget) -> Result<(), UploadError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| UploadError::io(error.to_string()))?;
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        lock(&self.uploads).push(RecordedUpload {
            path: path.to_path_buf(),
            contents,
            file_id: target.file_id,
            key: target.key.clone(),
        });
        Ok(())
    }
}

/// Staging area keeping rows in memory and writing a simple line format on
/// `finish`.
#[derive(Default)]
pub struct MemoryStaging {
    dir: Option<tempfile::TempDir>,
    created: Mutex<Vec<PathBuf>>,
}

impl MemoryStaging {
    /// Staging area writing into a fresh temporary directory.
    pub fn new() -> Result<Self, std::io::Error> {
        Ok(Self {
            dir: Some(tempfile::tempdir()?),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Paths of every artifact handed out.
    pub fn created(&self) -> Vec<PathBuf> {
        lock(&self.created).clone()
    }
}

impl StagingArea for MemoryStaging {
    fn create_artifact(&self, name_hint: &str) -> Result<Box<dyn StagingArtifact>, StagingError> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| StagingError::io("staging directory missing"))?;
        let mut created = lock(&self.created);
        let path = dir
            .path()
            .join(format!("{name_hint}-{}.txt", created.len()));
        created.push(path.clone());
        Ok(Box::new(LineArtifact {
            path,
            rows: Vec::new(),
        }))
    }
}

struct LineArtifact {
    path: PathBuf,
    rows: Vec<BufferedRow>,
}

impl RowSink for LineArtifact {
    fn write_row(&mut self, row: &BufferedRow) -> Result<(), StagingError> {
        self.rows.push(row.clone());
        Ok(())
    }
}

impl StagingArtifact for LineArtifact {
    fn finish(&mut self) -> Result<(), StagingError> {
        let text: String = self
            .rows
            .iter()
            .map(|row| format!("{}\n", row.body))
            .collect();
        std::fs::write(&self.path, text).map_err(|error| StagingError::io(error.to_string()))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn as_row_sink(&mut self) -> &mut dyn RowSink {
        self
    }
}

impl Drop for LineArtifact {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
