use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use unigrid_types::TransferProtocol;

use crate::error::StorageError;
use crate::storage::{join_path, ByteRange, ByteReader, ByteWriter, FileProperties, ImportMode, StorageClient, TransferSource};

/// Storage backed by a directory on a mounted filesystem
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    endpoint: String,
    protocols: Vec<TransferProtocol>,
    partial_read: bool,
}

impl LocalStorage {
    /// Storage rooted at `root`, offering BFT with partial reads
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let endpoint = format!("file://{}", root.display());
        Self {
            root,
            endpoint,
            protocols: vec![TransferProtocol::Bft],
            partial_read: true,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<TransferProtocol>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_partial_read(mut self, partial_read: bool) -> Self {
        self.partial_read = partial_read;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn check_protocol(&self, protocol: TransferProtocol) -> Result<(), StorageError> {
        if self.protocols.contains(&protocol) {
            Ok(())
        } else {
            Err(StorageError::UnsupportedProtocol(protocol.to_string()))
        }
    }
}

fn properties(path: String, meta: &std::fs::Metadata) -> FileProperties {
    FileProperties {
        path,
        is_directory: meta.is_dir(),
        size: meta.len(),
        executable: is_executable(meta),
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[async_trait]
impl StorageClient for LocalStorage {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn supported_protocols(&self) -> Result<Vec<TransferProtocol>, StorageError> {
        Ok(self.protocols.clone())
    }

    async fn list_properties(&self, path: &str) -> Result<Option<FileProperties>, StorageError> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(Some(properties(path.trim_start_matches('/').to_string(), &meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<FileProperties>, StorageError> {
        let full = self.resolve(path)?;
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            listing.push(properties(join_path(path, &name), &meta));
        }
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn get_export(&self, path: &str, protocol: TransferProtocol) -> Result<Box<dyn TransferSource>, StorageError> {
        self.check_protocol(protocol)?;
        let full = self.resolve(path)?;
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Exporting {} over {}", full.display(), protocol);
        Ok(Box::new(LocalExport {
            path: full,
            protocol,
            size: meta.len(),
            partial_read: self.partial_read,
        }))
    }

    async fn get_import(
        &self,
        path: &str,
        protocol: TransferProtocol,
        mode: ImportMode,
    ) -> Result<ByteWriter, StorageError> {
        self.check_protocol(protocol)?;
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut options = fs::OpenOptions::new();
        options.create(true);
        match mode {
            ImportMode::Append => options.append(true),
            ImportMode::Truncate => options.write(true).truncate(true),
        };
        debug!("Importing {} over {}", full.display(), protocol);
        Ok(Box::pin(options.open(&full).await?))
    }
}

struct LocalExport {
    path: PathBuf,
    protocol: TransferProtocol,
    size: u64,
    partial_read: bool,
}

#[async_trait]
impl TransferSource for LocalExport {
    fn protocol(&self) -> TransferProtocol {
        self.protocol
    }

    fn source_size(&self) -> u64 {
        self.size
    }

    fn supports_partial_read(&self) -> bool {
        self.partial_read
    }

    async fn open(&mut self, range: Option<ByteRange>) -> Result<ByteReader, StorageError> {
        let mut file = fs::File::open(&self.path).await?;
        match range {
            Some(range) => {
                if !self.partial_read {
                    return Err(StorageError::Backend(format!(
                        "partial read of {} not supported",
                        self.path.display()
                    )));
                }
                file.seek(SeekFrom::Start(range.start)).await?;
                Ok(Box::pin(file.take(range.len())))
            }
            None => Ok(Box::pin(file)),
        }
    }
}
