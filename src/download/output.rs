use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::DownloadError;
use crate::prelude::*;

/// the file every peer writes its blocks into.
///
/// blocks land at their global offset, so pieces are never assembled in memory. closing is
/// idempotent and only happens once the download is complete, blocks written after that are
/// redundant copies and get dropped.
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl OutputFile {
    /// creates (or truncates) the file at `path` and sizes it to `length` bytes.
    pub async fn create(path: impl Into<PathBuf>, length: u64) -> Result<Self, DownloadError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(DownloadError::Io)?;
        file.set_len(length).await.map_err(DownloadError::Io)?;

        debug!(path = %path.display(), length, "created output file");
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// opens an existing file without write access, every `write_at` fails with an i/o error.
    #[cfg(test)]
    pub(crate) async fn read_only(path: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let path = path.into();
        let file = File::open(&path).await.map_err(DownloadError::Io)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), DownloadError> {
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            debug!(offset, "output file already closed, dropping block");
            return Ok(());
        };

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(DownloadError::Io)?;
        file.write_all(bytes).await.map_err(DownloadError::Io)?;
        // surface the write's error here rather than on some later unrelated operation.
        file.flush().await.map_err(DownloadError::Io)
    }

    /// flushes and closes the file, returns false if it had already been closed.
    pub async fn close(&self) -> Result<bool, DownloadError> {
        let Some(mut file) = self.file.lock().await.take() else {
            return Ok(false);
        };

        file.flush().await.map_err(DownloadError::Io)?;
        file.sync_all().await.map_err(DownloadError::Io)?;
        info!(path = %self.path.display(), "output file closed");
        Ok(true)
    }

    pub async fn is_closed(&self) -> bool {
        self.file.lock().await.is_none()
    }
}
