#![deny(unsafe_code)]
//! Data staging for grid jobs.
//!
//! Inputs are uploaded to the job's storage before submission, outputs are
//! downloaded after completion, and the staged outputs are published to the
//! registry. Storage endpoints sit behind the [`StorageClient`] trait;
//! [`LocalStorage`] serves mounted storage.

pub mod error;
pub mod local;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pattern;
pub mod pipeline;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use error::{RegistryError, Result, StagingError, StorageError, TransferError};
pub use local::LocalStorage;
#[cfg(feature = "metrics")]
pub use metrics::StagingMetrics;
pub use pattern::FilePattern;
pub use pipeline::StagingPipeline;
pub use registry::{publish, MemoryRegistry, OutputKind, RegistryClient, RegistryConnector, RegistryLease};
pub use storage::{ByteRange, FileProperties, ImportMode, StorageClient, TransferSource};
pub use transfer::{select_protocol, Direction, FileTransfer, TransferSummary, TransferTask, WriteMode};
