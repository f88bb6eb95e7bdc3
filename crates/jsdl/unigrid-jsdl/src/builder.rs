//! Idempotent accessors on [`JobDefinition`].
//!
//! `get_or_create_*` returns the existing element when there is one and
//! creates it otherwise, so callers never check for presence first.

use unigrid_types::{ApplicationKind, RangeValue};

use crate::document::{
    Application, ApplicationVariant, Boundary, CommandLine, DataStaging, EnvironmentVariable, JobDefinition,
    JobIdentification, NamedResourceRequest, RangeRequirement, Resources, SpmdApplication,
};
use crate::error::{DocumentBuildError, Result};
use crate::flags::StagingFlags;

/// Filesystem used when none is named; not written to the document
pub const DEFAULT_FILESYSTEM: &str = "Work";

impl JobDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_identification(&mut self) -> &mut JobIdentification {
        self.description.identification.get_or_insert_with(Default::default)
    }

    pub fn get_or_create_application(&mut self) -> &mut Application {
        self.description.application.get_or_insert_with(Default::default)
    }

    pub fn get_or_create_resources(&mut self) -> &mut Resources {
        self.description.resources.get_or_insert_with(Default::default)
    }

    /// The application variant, created as `kind` when absent.
    ///
    /// A document carries one variant only. Asking for a different kind once
    /// a variant exists returns the existing one unchanged.
    pub fn get_or_create_variant(&mut self, kind: ApplicationKind) -> &mut ApplicationVariant {
        self.get_or_create_application().variant.get_or_insert_with(|| match kind {
            ApplicationKind::Posix => ApplicationVariant::Posix(CommandLine::default()),
            ApplicationKind::HpcProfile => ApplicationVariant::HpcProfile(CommandLine::default()),
            ApplicationKind::Spmd => ApplicationVariant::Spmd(SpmdApplication::default()),
        })
    }

    pub fn get_or_create_posix_application(&mut self) -> &mut ApplicationVariant {
        self.get_or_create_variant(ApplicationKind::Posix)
    }

    pub fn get_or_create_hpc_profile_application(&mut self) -> &mut ApplicationVariant {
        self.get_or_create_variant(ApplicationKind::HpcProfile)
    }

    pub fn get_or_create_spmd_application(&mut self) -> &mut ApplicationVariant {
        self.get_or_create_variant(ApplicationKind::Spmd)
    }

    pub fn application_variant(&self) -> Option<&ApplicationVariant> {
        self.description.application.as_ref()?.variant.as_ref()
    }

    pub fn set_job_name(&mut self, name: impl Into<String>) {
        self.get_or_create_identification().job_name = Some(name.into());
    }

    pub fn add_project_name(&mut self, project: impl Into<String>) {
        self.get_or_create_identification().projects.push(project.into());
    }

    pub fn set_application_name(&mut self, name: impl Into<String>) {
        self.get_or_create_application().name = Some(name.into());
    }

    pub fn set_application_version(&mut self, version: impl Into<String>) {
        self.get_or_create_application().version = Some(version.into());
    }

    /// Add an environment variable to the application, creating a POSIX
    /// application if there is none yet
    pub fn add_environment_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.get_or_create_posix_application()
            .command_line_mut()
            .environment
            .push(EnvironmentVariable {
                name: name.into(),
                value: value.into(),
            });
    }

    pub fn add_candidate_host(&mut self, host: impl Into<String>) {
        self.get_or_create_resources().candidate_hosts.push(host.into());
    }

    pub fn add_named_resource(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.get_or_create_resources().named_resources.push(NamedResourceRequest {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Stage `file` in from `uri` before the job starts
    pub fn add_stage_in(&mut self, uri: impl Into<String>, filesystem: Option<&str>, file: impl Into<String>, flags: StagingFlags) {
        let mut staging = new_staging(filesystem, file.into(), flags);
        staging.source = Some(uri.into());
        self.description.data_staging.push(staging);
    }

    /// Stage `file` out to `uri` after the job ends
    pub fn add_stage_out(&mut self, uri: impl Into<String>, filesystem: Option<&str>, file: impl Into<String>, flags: StagingFlags) {
        let mut staging = new_staging(filesystem, file.into(), flags);
        staging.target = Some(uri.into());
        self.description.data_staging.push(staging);
    }
}

fn new_staging(filesystem: Option<&str>, file_name: String, flags: StagingFlags) -> DataStaging {
    DataStaging {
        file_name,
        filesystem_name: filesystem
            .filter(|fs| *fs != DEFAULT_FILESYSTEM)
            .map(str::to_string),
        creation_flag: flags.creation_flag(),
        delete_on_termination: flags.delete_on_termination(),
        source: None,
        target: None,
    }
}

impl RangeRequirement {
    /// Translate a [`RangeValue`].
    ///
    /// With neither bound set the value is exact, carrying its epsilon when
    /// non-zero. Otherwise each present bound is written, exclusive when the
    /// range does not include it.
    pub fn from_range_value(name: &str, range: &RangeValue) -> Result<Self> {
        if range.is_unpopulated() {
            return Err(DocumentBuildError::UnpopulatedRequirement(name.to_string()));
        }
        if range.is_exact() {
            let value = range
                .exact_value()
                .ok_or_else(|| DocumentBuildError::UnpopulatedRequirement(name.to_string()))?;
            let epsilon = Some(range.epsilon()).filter(|e| *e != 0.0 && !e.is_nan());
            return Ok(RangeRequirement::Exact { value, epsilon });
        }
        Ok(RangeRequirement::Ranged {
            lower: range.lower_bound().map(|value| Boundary {
                value,
                exclusive: !range.includes_lower_bound(),
            }),
            upper: range.upper_bound().map(|value| Boundary {
                value,
                exclusive: !range.includes_upper_bound(),
            }),
        })
    }
}
