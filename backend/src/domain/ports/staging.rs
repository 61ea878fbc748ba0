//! Driven port for local staging artifacts.
//!
//! Drained batches are streamed row by row into a [`RowSink`]. The staging
//! area hands out sinks backed by temporary files that are removed when the
//! artifact is dropped.

use std::path::Path;

use super::define_port_error;
use crate::domain::BufferedRow;

define_port_error! {
    /// Errors raised while writing a staging artifact.
    pub enum StagingError {
        /// Local filesystem failure.
        Io { message: String } => "staging io failed: {message}",
        /// Row could not be encoded.
        Encode { message: String } => "staging encode failed: {message}",
    }
}

/// Row-oriented serialisation target for staged or drained batches.
pub trait RowSink: Send {
    /// Append one row in export order.
    fn write_row(&mut self, row: &BufferedRow) -> Result<(), StagingError>;
}

impl RowSink for Vec<BufferedRow> {
    fn write_row(&mut self, row: &BufferedRow) -> Result<(), StagingError> {
        self.push(row.clone());
        Ok(())
    }
}

/// A temporary file receiving rows; the file is deleted on drop.
pub trait StagingArtifact: RowSink {
    /// Flush buffered output so the file on disk is complete.
    fn finish(&mut self) -> Result<(), StagingError>;

    /// Location of the artifact on local storage.
    fn path(&self) -> &Path;

    /// Borrow the artifact as a plain row sink.
    fn as_row_sink(&mut self) -> &mut dyn RowSink;
}

/// Factory for staging artifacts.
pub trait StagingArea: Send + Sync {
    /// Create an empty artifact whose file name contains `name_hint`.
    fn create_artifact(&self, name_hint: &str) -> Result<Box<dyn StagingArtifact>, StagingError>;
}
