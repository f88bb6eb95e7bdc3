#![deny(unsafe_code)]
//! JSDL job descriptions for grid job submission.
//!
//! [`JobDescriptionGenerator::build`] turns a process execution context into a
//! [`JobDefinition`] tree, which renders to XML with [`JobDefinition::to_xml`].

pub mod builder;
pub mod document;
pub mod error;
pub mod flags;
pub mod generator;
pub mod xml;

pub use builder::DEFAULT_FILESYSTEM;
pub use document::{
    Application, ApplicationVariant, Boundary, CommandLine, CreationFlag, DataStaging, EnvironmentVariable,
    JobDefinition, JobDescription, JobIdentification, NamedResourceRequest, RangeRequirement, Resources,
    SpmdApplication, SpmdVariation,
};
pub use error::{DocumentBuildError, Result};
pub use flags::StagingFlags;
pub use generator::{build, JobDescriptionGenerator, QUEUE_RESOURCE};
