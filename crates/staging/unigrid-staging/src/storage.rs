//! Storage endpoint abstraction.
//!
//! A [`StorageClient`] is the job's remote working directory as seen by the
//! staging code: it can be listed, searched and read from or written to over
//! one of the transfer protocols it advertises.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use unigrid_types::TransferProtocol;

use crate::error::StorageError;
use crate::pattern::FilePattern;

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;
pub type ByteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Metadata of a file or directory on a storage endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProperties {
    /// Path relative to the storage root, `/` separated
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub executable: bool,
}

impl FileProperties {
    pub fn name(&self) -> &str {
        unigrid_types::uri::file_name(&self.path)
    }
}

/// Inclusive byte range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

/// Whether an import replaces or extends the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Truncate,
    Append,
}

/// Readable side of a transfer, returned by [`StorageClient::get_export`]
#[async_trait]
pub trait TransferSource: Send {
    fn protocol(&self) -> TransferProtocol;

    /// Size of the whole source in bytes
    fn source_size(&self) -> u64;

    fn supports_partial_read(&self) -> bool;

    /// Open the byte stream, limited to `range` when given
    async fn open(&mut self, range: Option<ByteRange>) -> Result<ByteReader, StorageError>;
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Address of the storage, used in staging URIs and log lines
    fn endpoint(&self) -> &str;

    async fn supported_protocols(&self) -> Result<Vec<TransferProtocol>, StorageError>;

    /// Properties of `path`, or `None` when it does not exist
    async fn list_properties(&self, path: &str) -> Result<Option<FileProperties>, StorageError>;

    async fn list_directory(&self, path: &str) -> Result<Vec<FileProperties>, StorageError>;

    /// Entries directly under `dir` whose name matches `pattern`
    async fn find(&self, dir: &str, pattern: &FilePattern) -> Result<Vec<FileProperties>, StorageError> {
        let entries = self.list_directory(dir).await?;
        Ok(entries.into_iter().filter(|e| pattern.matches(e.name())).collect())
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError>;

    async fn get_export(&self, path: &str, protocol: TransferProtocol) -> Result<Box<dyn TransferSource>, StorageError>;

    async fn get_import(
        &self,
        path: &str,
        protocol: TransferProtocol,
        mode: ImportMode,
    ) -> Result<ByteWriter, StorageError>;
}

/// Join a storage directory and an entry name
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.trim_start_matches('/').to_string()
    } else {
        format!("{}/{}", dir, name.trim_start_matches('/'))
    }
}

/// Split a storage path into its parent directory and last segment
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}
