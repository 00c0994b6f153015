//! Local filesystem-backed slide source implementation.
//!
//! Grounded on `slide/s3_source.rs`: the slide ID is resolved against a root
//! directory instead of an S3 bucket/key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::IoError;
use crate::io::FsRangeReader;

use super::SlideSource;

/// Filesystem-backed implementation of `SlideSource`.
///
/// Slide IDs are joined onto `root`; `..` path segments are rejected so a
/// request cannot escape the configured root.
#[derive(Clone)]
pub struct FsSlideSource {
    root: PathBuf,
}

impl FsSlideSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, slide_id: &str) -> Result<PathBuf, IoError> {
        if slide_id.split('/').any(|segment| segment == "..") {
            return Err(IoError::NotFound(slide_id.to_string()));
        }
        Ok(self.root.join(slide_id))
    }
}

#[async_trait]
impl SlideSource for FsSlideSource {
    type Reader = FsRangeReader;

    async fn create_reader(&self, slide_id: &str) -> Result<Self::Reader, IoError> {
        let path = self.resolve(slide_id)?;
        FsRangeReader::new(path).await
    }
}
