//! CSV staging artifacts on local disk.
//!
//! Each artifact is a named temporary file with a `timestamp,headers,body`
//! header row followed by one record per buffered row, timestamps in RFC 3339.
//! The file is removed when the artifact is dropped.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use tempfile::NamedTempFile;

use crate::domain::BufferedRow;
use crate::domain::ports::{RowSink, StagingArea, StagingArtifact, StagingError};

const HEADER: [&str; 3] = ["timestamp", "headers", "body"];

/// Staging area creating CSV artifacts inside one directory.
#[derive(Debug, Clone)]
pub struct CsvStagingArea {
    dir: PathBuf,
}

impl CsvStagingArea {
    /// Stage artifacts inside `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stage artifacts inside the system temporary directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Directory receiving artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StagingArea for CsvStagingArea {
    fn create_artifact(&self, name_hint: &str) -> Result<Box<dyn StagingArtifact>, StagingError> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{name_hint}-"))
            .suffix(".csv")
            .tempfile_in(&self.dir)
            .map_err(map_io_error)?;
        let handle = file.as_file().try_clone().map_err(map_io_error)?;
        let mut writer = csv::Writer::from_writer(handle);
        writer.write_record(HEADER).map_err(map_csv_error)?;
        Ok(Box::new(CsvArtifact { writer, file }))
    }
}

/// One CSV artifact backed by a temporary file.
pub struct CsvArtifact {
    writer: csv::Writer<File>,
    file: NamedTempFile,
}

impl RowSink for CsvArtifact {
    fn write_row(&mut self, row: &BufferedRow) -> Result<(), StagingError> {
        let timestamp = row.time.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.writer
            .write_record([timestamp.as_str(), row.headers.as_str(), row.body.as_str()])
            .map_err(map_csv_error)
    }
}

impl StagingArtifact for CsvArtifact {
    fn finish(&mut self) -> Result<(), StagingError> {
        self.writer.flush().map_err(map_io_error)
    }

    fn path(&self) -> &Path {
        self.file.path()
    }

    fn as_row_sink(&mut self) -> &mut dyn RowSink {
        self
    }
}

fn map_io_error(error: std::io::Error) -> StagingError {
    StagingError::io(error.to_string())
}

fn map_csv_error(error: csv::Error) -> StagingError {
    if error.is_io_error() {
        StagingError::io(error.to_string())
    } else {
        StagingError::encode(error.to_string())
    }
}
