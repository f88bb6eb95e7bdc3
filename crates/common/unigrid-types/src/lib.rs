#![deny(unsafe_code)]
//! Shared model for the unigrid job submission adapter.
//!
//! The orchestrator hands each job attempt over as a [`ProcessExecutionContext`];
//! the security, job description and staging crates all read from it.

pub mod cancel;
pub mod context;
pub mod protocol;
pub mod range;
pub mod uri;

pub use cancel::{run_bounded, Interrupted};
pub use context::{
    ApplicationDescriptor, ApplicationKind, InputDataObject, InputDataType, JobSubmissionProtocol,
    OutputDataObject, OutputDataType, Parallelism, ProcessExecutionContext, ResourceScheduling,
};
pub use protocol::{ProtocolParseError, StagingUri, TransferProtocol};
pub use range::RangeValue;
