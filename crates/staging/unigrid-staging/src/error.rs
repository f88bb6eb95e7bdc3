#![doc = "Error types for data staging."]

use thiserror::Error;
use unigrid_types::Interrupted;

/// Failure of a single file transfer
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No supported transfer protocol at {endpoint}")]
    NoSupportedProtocol { endpoint: String },

    #[error("Cannot transfer {source_path} to {target}: one is a directory, the other a file")]
    DirectoryMismatch { source_path: String, target: String },

    #[error("Source does not support partial reads: {0}")]
    UnsupportedPartialRead(String),

    #[error("Target is not writable: {0}")]
    TargetNotWritable(String),

    #[error("Target already exists: {0}")]
    TargetExists(String),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid byte range {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Transfer timed out: {operation}")]
    Timeout { operation: String },

    #[error("Transfer cancelled: {operation}")]
    Cancelled { operation: String },
}

impl TransferError {
    pub(crate) fn interrupted(operation: &str, reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => TransferError::Cancelled {
                operation: operation.to_string(),
            },
            Interrupted::TimedOut => TransferError::Timeout {
                operation: operation.to_string(),
            },
        }
    }
}

/// Errors reported by a storage endpoint
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path escapes the storage root: {0}")]
    InvalidPath(String),

    #[error("Protocol {0} not offered by this storage")]
    UnsupportedProtocol(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors reported by the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Registry rejected the update: {0}")]
    Rejected(String),
}

/// Error returned by the staging pipeline
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, StagingError>;
