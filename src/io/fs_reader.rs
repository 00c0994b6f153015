//! Local filesystem `RangeReader` implementation.
//!
//! Grounded on `io/s3_reader.rs`: same `RangeReader` contract, backed by
//! `tokio::fs` instead of an S3 `GetObject` range request. Used when
//! `--source fs` roots source images on local or network-mounted disk rather
//! than an object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::error::IoError;
use crate::io::RangeReader;

/// Reads byte ranges from a file on local (or network-mounted) disk.
#[derive(Debug, Clone)]
pub struct FsRangeReader {
    path: PathBuf,
    identifier: String,
    size: u64,
    mtime: i64,
}

impl FsRangeReader {
    /// Open `path` and stat its size and mtime up front, mirroring
    /// `S3RangeReader::new` issuing a `HeadObject` at construction time.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self, IoError> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| fs_error(&path, e))?;
        let identifier = format!("file://{}", path.display());
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self {
            size: metadata.len(),
            identifier,
            mtime,
            path,
        })
    }
}

#[async_trait]
impl RangeReader for FsRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| fs_error(&self.path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| fs_error(&self.path, e))?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| fs_error(&self.path, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn last_modified(&self) -> i64 {
        self.mtime
    }
}

fn fs_error(path: &Path, e: std::io::Error) -> IoError {
    IoError::Filesystem {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
