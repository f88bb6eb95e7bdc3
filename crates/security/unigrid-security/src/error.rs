#![doc = "Error types for credential acquisition."]

use thiserror::Error;
use unigrid_types::Interrupted;

/// Main error type for the unigrid-security crate.
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Certificate build error: {0}")]
    CertificateBuild(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SecurityError {
    /// Map an interrupted bounded operation to the matching error
    pub(crate) fn interrupted(operation: &str, reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => SecurityError::Cancelled {
                operation: operation.to_string(),
            },
            Interrupted::TimedOut => SecurityError::Timeout {
                operation: operation.to_string(),
            },
        }
    }
}

/// Errors reported by a credential store gateway
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("Credential store backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, SecurityError>;
