//! JSDL document tree.
//!
//! Every optional element is an `Option` or a `Vec`, so an element exists
//! exactly when it has been created. The accessors in [`crate::builder`]
//! create elements on first use.

use serde::{Deserialize, Serialize};

/// Root of a JSDL document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub description: JobDescription,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub identification: Option<JobIdentification>,
    pub application: Option<Application>,
    pub resources: Option<Resources>,
    #[serde(default)]
    pub data_staging: Vec<DataStaging>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobIdentification {
    pub job_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// At most one variant; see [`JobDefinition::get_or_create_variant`]
    pub variant: Option<ApplicationVariant>,
}

/// The concrete application element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplicationVariant {
    Posix(CommandLine),
    HpcProfile(CommandLine),
    Spmd(SpmdApplication),
}

impl ApplicationVariant {
    pub fn command_line(&self) -> &CommandLine {
        match self {
            ApplicationVariant::Posix(cmd) | ApplicationVariant::HpcProfile(cmd) => cmd,
            ApplicationVariant::Spmd(spmd) => &spmd.command,
        }
    }

    pub fn command_line_mut(&mut self) -> &mut CommandLine {
        match self {
            ApplicationVariant::Posix(cmd) | ApplicationVariant::HpcProfile(cmd) => cmd,
            ApplicationVariant::Spmd(spmd) => &mut spmd.command,
        }
    }
}

/// Executable, arguments and I/O redirection shared by all variants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandLine {
    pub executable: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
    pub working_directory: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpmdApplication {
    pub command: CommandLine,
    pub number_of_processes: Option<u32>,
    pub processes_per_host: Option<u32>,
    pub threads_per_host: Option<u32>,
    pub variation: Option<SpmdVariation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpmdVariation {
    Mpi,
    OpenMp,
}

impl SpmdVariation {
    /// Variation URI defined by the JSDL SPMD extension
    pub fn uri(&self) -> &'static str {
        match self {
            SpmdVariation::Mpi => "http://www.ogf.org/jsdl/2007/02/jsdl-spmd/MPI",
            SpmdVariation::OpenMp => "http://www.ogf.org/jsdl/2007/02/jsdl-spmd/OpenMP",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub candidate_hosts: Vec<String>,
    pub cpu_architecture: Option<String>,
    pub operating_system: Option<String>,
    pub individual_cpu_speed: Option<RangeRequirement>,
    pub individual_cpu_time: Option<RangeRequirement>,
    pub individual_cpu_count: Option<RangeRequirement>,
    pub individual_physical_memory: Option<RangeRequirement>,
    pub individual_disk_space: Option<RangeRequirement>,
    pub total_cpu_count: Option<RangeRequirement>,
    pub total_resource_count: Option<RangeRequirement>,
    #[serde(default)]
    pub named_resources: Vec<NamedResourceRequest>,
}

/// JSDL range value: an exact value or a lower/upper bounded range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeRequirement {
    Exact {
        value: f64,
        epsilon: Option<f64>,
    },
    Ranged {
        lower: Option<Boundary>,
        upper: Option<Boundary>,
    },
}

impl RangeRequirement {
    pub fn exact(value: f64) -> Self {
        RangeRequirement::Exact { value, epsilon: None }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, RangeRequirement::Exact { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub value: f64,
    pub exclusive: bool,
}

/// Site specific resource setting, such as the batch queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedResourceRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationFlag {
    Overwrite,
    #[default]
    DontOverwrite,
    Append,
}

impl CreationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationFlag::Overwrite => "overwrite",
            CreationFlag::DontOverwrite => "dontOverwrite",
            CreationFlag::Append => "append",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStaging {
    pub file_name: String,
    pub filesystem_name: Option<String>,
    pub creation_flag: CreationFlag,
    pub delete_on_termination: bool,
    /// Where to fetch the file from before the job starts
    pub source: Option<String>,
    /// Where to push the file after the job ends
    pub target: Option<String>,
}

impl DataStaging {
    pub fn is_stage_in(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_stage_out(&self) -> bool {
        self.target.is_some()
    }
}
