//! Range readers over local files and in-memory buffers.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// Range reader backed by a local file.
///
/// Reads are serialized through a mutex because a seek followed by a read is
/// not atomic on a shared file handle.
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for range reads.
    ///
    /// Returns `IoError::NotFound` if the path does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();

        let file = File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(identifier.clone())
            } else {
                IoError::File(format!("{}: {}", identifier, e))
            }
        })?;
        let size = file.metadata().await?.len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Range reader over bytes already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
