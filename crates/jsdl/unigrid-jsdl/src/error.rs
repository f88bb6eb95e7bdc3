#![doc = "Error types for job description generation."]

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DocumentBuildError {
    /// A resource requirement was declared without exact value or bounds
    #[error("Resource requirement '{0}' has no value")]
    UnpopulatedRequirement(String),
}

pub type Result<T> = std::result::Result<T, DocumentBuildError>;
