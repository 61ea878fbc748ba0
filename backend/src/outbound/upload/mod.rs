//! Upload outbound adapters.
//!
//! This module provides an S3 implementation of the `FileUploader` port.

mod s3_uploader;

pub use s3_uploader::S3FileUploader;
