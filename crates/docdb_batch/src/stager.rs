//! Staging of inbound attachment streams.
//!
//! Each stream is copied chunk by chunk into a temporary file while its
//! SHA-256 is computed, so the content is never held in memory as a whole.
//! The resulting [`StagedAttachment`] owns the file and deletes it when
//! released or dropped.

use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};
use crate::shutdown::ShutdownSignal;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// A boxed attachment body as handed over by the multipart layer.
pub type AttachmentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Converts attachment streams into hashed, disk-backed blobs.
#[derive(Debug, Clone)]
pub struct AttachmentStager {
    temp_dir: PathBuf,
    chunk_size: usize,
    outstanding: Arc<AtomicUsize>,
}

impl AttachmentStager {
    /// Creates a stager writing into `config.temp_dir`.
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            chunk_size: config.stage_chunk_size.max(1),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of staged attachments not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Stages one stream.
    ///
    /// On I/O failure or shutdown the partially written file is deleted.
    pub async fn stage<R>(
        &self,
        reader: &mut R,
        shutdown: &ShutdownSignal,
    ) -> BatchResult<StagedAttachment>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let temp = tempfile::Builder::new()
            .prefix("docdb-attachment-")
            .tempfile_in(&self.temp_dir)?;
        let mut out = tokio::fs::File::from_std(temp.as_file().try_clone()?);

        // From here on, any early return drops `staged` and removes the file
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let mut staged = StagedAttachment {
            hash: String::new(),
            size: 0,
            file: Some(temp),
            outstanding: Arc::clone(&self.outstanding),
        };

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(BatchError::Cancelled),
                read = reader.read(&mut buf) => read?,
            };
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            out.write_all(&buf[..read]).await?;
            staged.size += read as u64;
        }
        out.flush().await?;

        staged.hash = to_hex(&hasher.finalize());
        tracing::debug!(hash = %staged.hash, size = staged.size, "attachment staged");
        Ok(staged)
    }

    /// Stages several streams in order.
    ///
    /// If one fails, those already staged are released before returning.
    pub async fn stage_all(
        &self,
        readers: Vec<AttachmentReader>,
        shutdown: &ShutdownSignal,
    ) -> BatchResult<VecDeque<StagedAttachment>> {
        let mut staged = VecDeque::with_capacity(readers.len());
        for mut reader in readers {
            staged.push_back(self.stage(&mut reader, shutdown).await?);
        }
        Ok(staged)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

/// A staged attachment: content hash, size and an exclusively owned
/// temporary file.
#[derive(Debug)]
pub struct StagedAttachment {
    hash: String,
    size: u64,
    file: Option<NamedTempFile>,
    outstanding: Arc<AtomicUsize>,
}

impl StagedAttachment {
    /// Lowercase hex SHA-256 of the content.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Content size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path of the backing file, `None` once released.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }

    /// Returns true once the backing file was released.
    pub fn is_released(&self) -> bool {
        self.file.is_none()
    }

    /// Opens the content for reading from the start.
    pub fn open(&self) -> BatchResult<File> {
        match &self.file {
            Some(file) => Ok(file.reopen()?),
            None => Err(BatchError::InvalidOperation(format!(
                "staged attachment {} was already released",
                self.hash
            ))),
        }
    }

    /// Deletes the backing file. Calling it again does nothing.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = file.close() {
            tracing::warn!(hash = %self.hash, error = %e, "failed to remove staged attachment");
        }
    }
}

impl Drop for StagedAttachment {
    fn drop(&mut self) {
        self.release();
    }
}
