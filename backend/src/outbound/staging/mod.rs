//! Staging outbound adapters.
//!
//! Batches are written to CSV temporary files before upload.

mod csv_staging;

pub use csv_staging::{CsvArtifact, CsvStagingArea};
