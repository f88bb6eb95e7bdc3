use serde::{Deserialize, Serialize};

use crate::range::RangeValue;

/// Protocol family used to submit the job to the compute resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSubmissionProtocol {
    /// UNICORE BES endpoint (signed messages, proxy-certificate out handler)
    Unicore,
    /// Plain OGSA-BES/GSI endpoint authenticated with an X.509 credential
    Globus,
}

/// How the application is run on the allocated resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// Single process
    #[default]
    Serial,
    /// Message passing across hosts
    Mpi,
    /// Shared-memory threads within a host
    OpenMp,
}

/// Application variant the job description should carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationKind {
    /// JSDL POSIX application
    Posix,
    /// HPC Basic Profile application
    HpcProfile,
    /// JSDL SPMD application
    Spmd,
}

/// Description of the application to invoke
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    /// Application name
    pub name: String,

    /// Optional application version
    pub version: Option<String>,

    /// Optional human readable description
    pub description: Option<String>,

    /// Path of the executable on the compute resource
    pub executable: String,

    /// Command line arguments, in order
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Environment variables as (name, value) pairs
    #[serde(default)]
    pub environment: Vec<(String, String)>,

    /// Optional working directory on the compute resource
    pub working_directory: Option<String>,

    /// Parallel execution model
    #[serde(default)]
    pub parallelism: Parallelism,

    /// Explicit application variant; derived from `parallelism` when absent
    pub kind: Option<ApplicationKind>,

    /// Processes per host for parallel runs
    pub processes_per_host: Option<u32>,

    /// Threads per host for parallel runs
    pub threads_per_host: Option<u32>,
}

impl ApplicationDescriptor {
    /// Application variant requested by the caller.
    ///
    /// An explicit `kind` wins; otherwise serial runs map to POSIX and
    /// MPI/OpenMP runs map to SPMD.
    pub fn application_kind(&self) -> ApplicationKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match self.parallelism {
            Parallelism::Serial => ApplicationKind::Posix,
            Parallelism::Mpi | Parallelism::OpenMp => ApplicationKind::Spmd,
        }
    }
}

/// Resource scheduling parameters chosen for the process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceScheduling {
    /// Total number of CPUs across all nodes
    pub total_cpu_count: Option<u32>,

    /// Number of nodes
    pub node_count: Option<u32>,

    /// Physical memory per individual resource, in MB
    pub total_physical_memory: Option<u64>,

    /// Wall time limit in minutes
    pub wall_time_limit: Option<u32>,

    /// Batch queue name
    pub queue_name: Option<String>,

    /// Optional disk space requirement per resource
    pub individual_disk_space: Option<RangeValue>,

    /// Optional CPU speed requirement per resource
    pub individual_cpu_speed: Option<RangeValue>,

    /// Optional CPU architecture name (e.g. `x86_64`)
    pub cpu_architecture: Option<String>,

    /// Optional operating system name
    pub operating_system: Option<String>,

    /// Hosts the job may run on
    #[serde(default)]
    pub candidate_hosts: Vec<String>,
}

/// Data type of a declared input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDataType {
    /// Literal string argument
    String,
    /// Single file URI
    Uri,
    /// Comma separated list of file URIs
    UriCollection,
}

/// Declared input of the process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDataObject {
    /// Input name
    pub name: String,

    /// Input data type
    pub kind: InputDataType,

    /// Input value (literal or URI)
    pub value: String,

    /// Whether the application cannot run without this input
    #[serde(default)]
    pub required: bool,
}

/// Data type of a declared output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputDataType {
    /// Standard output of the job
    Stdout,
    /// Standard error of the job
    Stderr,
    /// File produced by the job
    Uri,
}

/// Declared output of the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDataObject {
    /// Output name
    pub name: String,

    /// Output data type
    pub kind: OutputDataType,

    /// Location hint declared by the application
    pub location: Option<String>,

    /// Resolved path or URI of the output
    pub value: String,

    /// Whether the output must be produced
    #[serde(default)]
    pub required: bool,
}

impl OutputDataObject {
    /// Create a URI output with the given name and value
    pub fn uri(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OutputDataType::Uri,
            location: None,
            value: value.into(),
            required: false,
        }
    }
}

/// Unit of work handed to this adapter by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExecutionContext {
    /// Process identifier
    pub process_id: String,

    /// Experiment identifier
    pub experiment_id: String,

    /// Gateway (tenant) identifier used for credential lookups
    pub gateway_id: String,

    /// Optional project the experiment is charged to
    pub project_name: Option<String>,

    /// Distinguished name of the submitting user
    pub user_dn: Option<String>,

    /// Application to invoke
    pub application: ApplicationDescriptor,

    /// Resource scheduling parameters
    #[serde(default)]
    pub scheduling: ResourceScheduling,

    /// Protocol used to submit the job
    pub job_submission_protocol: JobSubmissionProtocol,

    /// Credential store token identifier
    pub credential_token: String,

    /// Declared inputs
    #[serde(default)]
    pub inputs: Vec<InputDataObject>,

    /// Declared outputs, updated in place while staging
    #[serde(default)]
    pub outputs: Vec<OutputDataObject>,

    /// Optional output directory URI
    pub output_dir: Option<String>,

    /// Name of the stdout file
    pub stdout_name: String,

    /// Name of the stderr file
    pub stderr_name: String,
}

impl ProcessExecutionContext {
    /// Create a context with empty inputs/outputs and default stdout/stderr names
    pub fn new(
        process_id: impl Into<String>,
        experiment_id: impl Into<String>,
        application: ApplicationDescriptor,
        job_submission_protocol: JobSubmissionProtocol,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            experiment_id: experiment_id.into(),
            gateway_id: String::new(),
            project_name: None,
            user_dn: None,
            application,
            scheduling: ResourceScheduling::default(),
            job_submission_protocol,
            credential_token: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_dir: None,
            stdout_name: "stdout".to_string(),
            stderr_name: "stderr".to_string(),
        }
    }

    /// Inputs declared as single file URIs
    pub fn uri_inputs(&self) -> impl Iterator<Item = &InputDataObject> {
        self.inputs.iter().filter(|i| i.kind == InputDataType::Uri)
    }

    /// Outputs declared as file URIs
    pub fn uri_outputs(&self) -> impl Iterator<Item = &OutputDataObject> {
        self.outputs.iter().filter(|o| o.kind == OutputDataType::Uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_kind_follows_parallelism() {
        let mut app = ApplicationDescriptor {
            name: "echo".to_string(),
            executable: "/bin/echo".to_string(),
            ..Default::default()
        };
        assert_eq!(app.application_kind(), ApplicationKind::Posix);

        app.parallelism = Parallelism::Mpi;
        assert_eq!(app.application_kind(), ApplicationKind::Spmd);

        app.kind = Some(ApplicationKind::HpcProfile);
        assert_eq!(app.application_kind(), ApplicationKind::HpcProfile);
    }

    #[test]
    fn test_context_serialization() {
        let mut ctx = ProcessExecutionContext::new(
            "proc-1",
            "exp-1",
            ApplicationDescriptor::default(),
            JobSubmissionProtocol::Unicore,
        );
        ctx.outputs.push(OutputDataObject::uri("result", "out.dat"));

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"unicore\""));
        assert!(json.contains("\"URI\""));

        let parsed: ProcessExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outputs, ctx.outputs);
        assert_eq!(parsed.stdout_name, "stdout");
    }
}
