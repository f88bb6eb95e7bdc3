//! File transfers between the local disk and a storage endpoint.
//!
//! A [`TransferTask`] names one source. A wildcard in its last segment expands
//! to every matching entry of the parent directory, a directory is walked when
//! the task asks for recursion, and anything else is a single file transfer.

use std::io::SeekFrom;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use unigrid_config::StagingConfig;
use unigrid_types::{run_bounded, TransferProtocol};

use crate::error::TransferError;
#[cfg(feature = "metrics")]
use crate::metrics::StagingMetrics;
use crate::pattern::{has_wildcard, FilePattern};
use crate::storage::{join_path, split_path, ByteRange, FileProperties, ImportMode, StorageClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// What to do when the target already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
    /// Leave the existing target alone and skip the file
    NoOverwrite,
    FailIfExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub source: String,
    pub destination: String,
    pub mode: WriteMode,
    pub range: Option<ByteRange>,
    pub wildcard: bool,
    pub recurse: bool,
    /// Acceptable protocols, most preferred first; empty means the configured list
    pub protocols: Vec<TransferProtocol>,
}

impl TransferTask {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            wildcard: has_wildcard(&source),
            source,
            destination: destination.into(),
            mode: WriteMode::default(),
            range: None,
            recurse: false,
            protocols: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recurse = true;
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<TransferProtocol>) -> Self {
        self.protocols = protocols;
        self
    }
}

/// Outcome of a transfer task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub files: usize,
    pub skipped: usize,
    pub bytes: u64,
}

impl TransferSummary {
    fn moved(bytes: u64) -> Self {
        Self {
            files: 1,
            skipped: 0,
            bytes,
        }
    }

    fn skipped_one() -> Self {
        Self {
            files: 0,
            skipped: 1,
            bytes: 0,
        }
    }
}

impl AddAssign for TransferSummary {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

/// First protocol of `preferred` that `advertised` contains
pub fn select_protocol(preferred: &[TransferProtocol], advertised: &[TransferProtocol]) -> Option<TransferProtocol> {
    preferred.iter().copied().find(|p| advertised.contains(p))
}

/// Moves files to and from one storage endpoint
pub struct FileTransfer<'a> {
    storage: &'a dyn StorageClient,
    preferred: Vec<TransferProtocol>,
    timeout: Option<Duration>,
    #[cfg(feature = "metrics")]
    metrics: Option<StagingMetrics>,
}

impl<'a> FileTransfer<'a> {
    pub fn new(storage: &'a dyn StorageClient, config: &StagingConfig) -> Self {
        Self {
            storage,
            preferred: config.preferred_protocols.clone(),
            timeout: config.transfer_timeout(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Bound each file copy; `None` lets large transfers run to completion
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: StagingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch `task.source` from storage into the local path `task.destination`
    pub async fn download(&self, task: &TransferTask, cancel: &CancellationToken) -> Result<TransferSummary, TransferError> {
        let result = self.download_task(task, cancel).await;
        #[cfg(feature = "metrics")]
        self.record(Direction::Download, &result);
        result
    }

    /// Send the local `task.source` to the storage path `task.destination`
    pub async fn upload(&self, task: &TransferTask, cancel: &CancellationToken) -> Result<TransferSummary, TransferError> {
        let result = self.upload_task(task, cancel).await;
        #[cfg(feature = "metrics")]
        self.record(Direction::Upload, &result);
        result
    }

    #[cfg(feature = "metrics")]
    fn record(&self, direction: Direction, result: &Result<TransferSummary, TransferError>) {
        if let Some(metrics) = &self.metrics {
            match result {
                Ok(summary) => metrics.record(direction, summary),
                Err(_) => metrics.record_failure(direction),
            }
        }
    }

    async fn protocol_for(&self, task: &TransferTask) -> Result<TransferProtocol, TransferError> {
        let advertised = self.storage.supported_protocols().await?;
        let preferred = if task.protocols.is_empty() {
            &self.preferred
        } else {
            &task.protocols
        };
        select_protocol(preferred, &advertised).ok_or_else(|| TransferError::NoSupportedProtocol {
            endpoint: self.storage.endpoint().to_string(),
        })
    }

    async fn download_task(&self, task: &TransferTask, cancel: &CancellationToken) -> Result<TransferSummary, TransferError> {
        let protocol = self.protocol_for(task).await?;
        let target = PathBuf::from(&task.destination);

        if task.wildcard {
            let (dir, glob) = split_path(&task.source);
            let pattern = FilePattern::new(glob)?;
            let matches = self.storage.find(dir, &pattern).await?;
            if matches.is_empty() {
                debug!("No files match {} at {}", task.source, self.storage.endpoint());
            }
            fs::create_dir_all(&target).await.map_err(|e| write_error(&target, e))?;

            let mut summary = TransferSummary::default();
            for entry in matches {
                let entry_target = target.join(entry.name());
                summary += self.download_entry(entry, entry_target, protocol, task, cancel).await?;
            }
            return Ok(summary);
        }

        let entry = self
            .storage
            .list_properties(&task.source)
            .await?
            .ok_or_else(|| TransferError::FileNotFound(task.source.clone()))?;
        let target = if !entry.is_directory && is_local_dir(&target).await {
            target.join(entry.name())
        } else {
            target
        };
        self.download_entry(entry, target, protocol, task, cancel).await
    }

    fn download_entry<'b>(
        &'b self,
        entry: FileProperties,
        target: PathBuf,
        protocol: TransferProtocol,
        task: &'b TransferTask,
        cancel: &'b CancellationToken,
    ) -> BoxFuture<'b, Result<TransferSummary, TransferError>> {
        async move {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled { operation: entry.path });
            }
            if !entry.is_directory {
                return self.download_file(&entry, &target, protocol, task, cancel).await;
            }
            if !task.recurse {
                info!("Skipping remote directory {}: recursion not requested", entry.path);
                return Ok(TransferSummary::skipped_one());
            }
            if let Ok(meta) = fs::metadata(&target).await {
                if !meta.is_dir() {
                    return Err(TransferError::DirectoryMismatch {
                        source_path: entry.path,
                        target: target.display().to_string(),
                    });
                }
            }
            fs::create_dir_all(&target).await.map_err(|e| write_error(&target, e))?;

            let mut summary = TransferSummary::default();
            for child in self.storage.list_directory(&entry.path).await? {
                let child_target = target.join(child.name());
                summary += self.download_entry(child, child_target, protocol, task, cancel).await?;
            }
            Ok(summary)
        }
        .boxed()
    }

    async fn download_file(
        &self,
        entry: &FileProperties,
        target: &Path,
        protocol: TransferProtocol,
        task: &TransferTask,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, TransferError> {
        match fs::metadata(target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(TransferError::DirectoryMismatch {
                    source_path: entry.path.clone(),
                    target: target.display().to_string(),
                })
            }
            Ok(_) => match task.mode {
                WriteMode::NoOverwrite => {
                    debug!("Keeping existing {}", target.display());
                    return Ok(TransferSummary::skipped_one());
                }
                WriteMode::FailIfExists => return Err(TransferError::TargetExists(target.display().to_string())),
                WriteMode::Overwrite | WriteMode::Append => {}
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut source = self.storage.get_export(&entry.path, protocol).await?;
        if let Some(range) = task.range {
            if !range.is_valid() {
                return Err(TransferError::InvalidRange {
                    start: range.start,
                    end: range.end,
                });
            }
            if !source.supports_partial_read() {
                return Err(TransferError::UnsupportedPartialRead(entry.path.clone()));
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| write_error(parent, e))?;
        }
        // appends extend the target in place; anything else is renamed over it once complete
        let staged = if task.mode == WriteMode::Append {
            target.to_path_buf()
        } else {
            partial_path(target)
        };
        let mut options = fs::OpenOptions::new();
        options.create(true);
        if task.mode == WriteMode::Append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut file = options.open(&staged).await.map_err(|e| write_error(&staged, e))?;

        debug!(
            "Downloading {} -> {} over {} ({} bytes at source)",
            entry.path,
            target.display(),
            protocol,
            source.source_size()
        );
        let copy = async {
            let mut reader = source.open(task.range).await?;
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, TransferError>(bytes)
        };
        let copied = run_bounded(cancel, self.timeout, copy)
            .await
            .map_err(|reason| TransferError::interrupted(&entry.path, reason))
            .and_then(|result| result);
        drop(file);
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                if staged != target {
                    if let Err(cleanup) = fs::remove_file(&staged).await {
                        warn!("Could not remove partial download {}: {}", staged.display(), cleanup);
                    }
                }
                return Err(e);
            }
        };
        if staged != target {
            fs::rename(&staged, target).await.map_err(|e| write_error(target, e))?;
        }

        if entry.executable {
            set_executable(target).await;
        }
        debug!("Downloaded {} ({} bytes)", target.display(), bytes);
        Ok(TransferSummary::moved(bytes))
    }

    async fn upload_task(&self, task: &TransferTask, cancel: &CancellationToken) -> Result<TransferSummary, TransferError> {
        let protocol = self.protocol_for(task).await?;
        let source = PathBuf::from(&task.source);

        if task.wildcard {
            let dir = match source.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let glob = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pattern = FilePattern::new(&glob)?;
            let entries = local_entries(&dir)
                .await
                .map_err(|e| not_found_or(e, &dir.display().to_string()))?;
            self.ensure_remote_directory(&task.destination).await?;

            let mut summary = TransferSummary::default();
            for path in entries {
                let name = local_name(&path);
                if !pattern.matches(&name) {
                    continue;
                }
                let target = join_path(&task.destination, &name);
                summary += self.upload_entry(path, target, protocol, task, cancel).await?;
            }
            return Ok(summary);
        }

        let meta = fs::metadata(&source)
            .await
            .map_err(|e| not_found_or(e, &task.source))?;
        let mut target = task.destination.clone();
        if meta.is_file() {
            if let Some(existing) = self.storage.list_properties(&target).await? {
                if existing.is_directory {
                    target = join_path(&target, &local_name(&source));
                }
            }
        }
        self.upload_entry(source, target, protocol, task, cancel).await
    }

    async fn ensure_remote_directory(&self, path: &str) -> Result<(), TransferError> {
        match self.storage.list_properties(path).await? {
            Some(existing) if existing.is_directory => Ok(()),
            Some(_) => Err(TransferError::DirectoryMismatch {
                source_path: path.to_string(),
                target: format!("{}{}", self.storage.endpoint(), path),
            }),
            None => Ok(self.storage.create_directory(path).await?),
        }
    }

    fn upload_entry<'b>(
        &'b self,
        source: PathBuf,
        target: String,
        protocol: TransferProtocol,
        task: &'b TransferTask,
        cancel: &'b CancellationToken,
    ) -> BoxFuture<'b, Result<TransferSummary, TransferError>> {
        async move {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled {
                    operation: source.display().to_string(),
                });
            }
            let meta = fs::metadata(&source).await?;
            if !meta.is_dir() {
                return self.upload_file(&source, &target, protocol, task, cancel).await;
            }
            if !task.recurse {
                info!("Skipping local directory {}: recursion not requested", source.display());
                return Ok(TransferSummary::skipped_one());
            }
            match self.storage.list_properties(&target).await? {
                Some(existing) if !existing.is_directory => {
                    return Err(TransferError::DirectoryMismatch {
                        source_path: source.display().to_string(),
                        target,
                    })
                }
                Some(_) => {}
                None => self.storage.create_directory(&target).await?,
            }

            let mut summary = TransferSummary::default();
            for child in local_entries(&source).await? {
                let child_target = join_path(&target, &local_name(&child));
                summary += self.upload_entry(child, child_target, protocol, task, cancel).await?;
            }
            Ok(summary)
        }
        .boxed()
    }

    async fn upload_file(
        &self,
        source: &Path,
        target: &str,
        protocol: TransferProtocol,
        task: &TransferTask,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, TransferError> {
        if let Some(existing) = self.storage.list_properties(target).await? {
            if existing.is_directory {
                return Err(TransferError::DirectoryMismatch {
                    source_path: source.display().to_string(),
                    target: target.to_string(),
                });
            }
            match task.mode {
                WriteMode::NoOverwrite => {
                    debug!("Keeping existing {} at {}", target, self.storage.endpoint());
                    return Ok(TransferSummary::skipped_one());
                }
                WriteMode::FailIfExists => return Err(TransferError::TargetExists(target.to_string())),
                WriteMode::Overwrite | WriteMode::Append => {}
            }
        }
        if let Some(range) = task.range {
            if !range.is_valid() {
                return Err(TransferError::InvalidRange {
                    start: range.start,
                    end: range.end,
                });
            }
        }

        let mode = if task.mode == WriteMode::Append {
            ImportMode::Append
        } else {
            ImportMode::Truncate
        };
        let mut writer = self.storage.get_import(target, protocol, mode).await?;

        debug!("Uploading {} -> {} over {}", source.display(), target, protocol);
        let copy = async {
            let mut file = fs::File::open(source).await?;
            let bytes = match task.range {
                Some(range) => {
                    file.seek(SeekFrom::Start(range.start)).await?;
                    let mut limited = file.take(range.len());
                    tokio::io::copy(&mut limited, &mut writer).await?
                }
                None => tokio::io::copy(&mut file, &mut writer).await?,
            };
            writer.shutdown().await?;
            Ok::<u64, TransferError>(bytes)
        };
        let bytes = run_bounded(cancel, self.timeout, copy)
            .await
            .map_err(|reason| TransferError::interrupted(target, reason))??;

        debug!("Uploaded {} ({} bytes)", target, bytes);
        Ok(TransferSummary::moved(bytes))
    }
}

/// Hidden sibling a download is written to before it replaces `target`
fn partial_path(target: &Path) -> PathBuf {
    target.with_file_name(format!(".{}.part", local_name(target)))
}

async fn is_local_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn local_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn not_found_or(e: std::io::Error, path: &str) -> TransferError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TransferError::FileNotFound(path.to_string())
    } else {
        e.into()
    }
}

pub(crate) fn write_error(path: &Path, e: std::io::Error) -> TransferError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        TransferError::TargetNotWritable(path.display().to_string())
    } else {
        e.into()
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let result = async {
        let mut permissions = fs::metadata(path).await?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(path, permissions).await
    }
    .await;
    if let Err(e) = result {
        warn!("Could not mark {} executable: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) {}
