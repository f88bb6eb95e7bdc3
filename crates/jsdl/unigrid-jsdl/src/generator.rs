use log::{debug, info, warn};
use unigrid_config::JsdlConfig;
use unigrid_types::uri::{file_name, is_local};
use unigrid_types::{
    InputDataType, Parallelism, ProcessExecutionContext, ResourceScheduling, StagingUri,
    TransferProtocol,
};

use crate::document::{ApplicationVariant, JobDefinition, RangeRequirement, SpmdVariation};
use crate::error::Result;
use crate::flags::StagingFlags;

/// Name of the resource request carrying the batch queue
pub const QUEUE_RESOURCE: &str = "Queue";

/// Builds a [`JobDefinition`] from a process execution context
#[derive(Debug, Clone)]
pub struct JobDescriptionGenerator {
    stage_in_flags: StagingFlags,
    stage_out_flags: StagingFlags,
    staging_protocol: TransferProtocol,
}

impl Default for JobDescriptionGenerator {
    fn default() -> Self {
        Self::new(&JsdlConfig::default())
    }
}

impl JobDescriptionGenerator {
    pub fn new(config: &JsdlConfig) -> Self {
        Self {
            stage_in_flags: StagingFlags::from_bits(config.stage_in_flags),
            stage_out_flags: StagingFlags::from_bits(config.stage_out_flags),
            staging_protocol: TransferProtocol::Bft,
        }
    }

    /// Protocol named in staging URIs that point at the job's storage
    pub fn with_staging_protocol(mut self, protocol: TransferProtocol) -> Self {
        self.staging_protocol = protocol;
        self
    }

    /// Build the job description.
    ///
    /// Data staging entries are only written when `staging_endpoint` names
    /// the storage the job will use.
    pub fn build(&self, context: &ProcessExecutionContext, staging_endpoint: Option<&str>) -> Result<JobDefinition> {
        let mut definition = JobDefinition::new();

        add_identification(&mut definition, context);
        add_application(&mut definition, context);
        add_resources(&mut definition, &context.scheduling)?;

        if let Some(endpoint) = staging_endpoint {
            self.add_data_staging(&mut definition, context, endpoint);
        }

        info!(
            "Built job description for process {} ({} staging entries)",
            context.process_id,
            definition.description.data_staging.len()
        );
        Ok(definition)
    }

    fn add_data_staging(&self, definition: &mut JobDefinition, context: &ProcessExecutionContext, endpoint: &str) {
        for input in context.inputs.iter().filter(|i| i.kind == InputDataType::Uri) {
            let value = input.value.trim();
            if value.is_empty() {
                debug!("Input {} has no value, not staging it in", input.name);
                continue;
            }
            let name = file_name(value);
            if name.is_empty() {
                warn!("Input {} names no file in '{}', not staging it in", input.name, value);
                continue;
            }
            // local files are uploaded to the job's storage before submission
            let source = if is_local(value) {
                StagingUri::new(self.staging_protocol, endpoint, name).to_string()
            } else {
                value.to_string()
            };
            debug!("Stage-in {} from {}", name, source);
            definition.add_stage_in(source, None, name, self.stage_in_flags);
        }

        for output in context.uri_outputs() {
            let value = output.value.trim();
            if value.is_empty() {
                debug!("Output {} has no value, not staging it out", output.name);
                continue;
            }
            let name = file_name(value);
            if name.is_empty() {
                warn!("Output {} names no file in '{}', not staging it out", output.name, value);
                continue;
            }
            let target = StagingUri::new(self.staging_protocol, endpoint, name).to_string();
            debug!("Stage-out {} to {}", name, target);
            definition.add_stage_out(target, None, name, self.stage_out_flags);
        }
    }
}

/// Build a job description with default staging flags
pub fn build(context: &ProcessExecutionContext, staging_endpoint: Option<&str>) -> Result<JobDefinition> {
    JobDescriptionGenerator::default().build(context, staging_endpoint)
}

fn add_identification(definition: &mut JobDefinition, context: &ProcessExecutionContext) {
    let app = &context.application;
    if let Some(project) = context.project_name.as_deref().filter(|p| !p.is_empty()) {
        definition.add_project_name(project);
    }
    if !app.name.is_empty() {
        definition.set_job_name(app.name.clone());
    }
    if let Some(description) = app.description.as_deref().filter(|d| !d.is_empty()) {
        definition.get_or_create_identification().description = Some(description.to_string());
    }
}

fn add_application(definition: &mut JobDefinition, context: &ProcessExecutionContext) {
    let app = &context.application;
    if !app.name.is_empty() {
        definition.set_application_name(app.name.clone());
    }
    if let Some(version) = app.version.as_deref().filter(|v| !v.is_empty()) {
        definition.set_application_version(version);
    }

    let kind = app.application_kind();
    let variant = definition.get_or_create_variant(kind);
    {
        let command = variant.command_line_mut();
        command.executable = Some(app.executable.clone());
        command.arguments = app.arguments.clone();
        command.working_directory = app.working_directory.clone();
        command.output = Some(context.stdout_name.clone());
        command.error = Some(context.stderr_name.clone());
    }

    if let ApplicationVariant::Spmd(spmd) = variant {
        spmd.number_of_processes = context.scheduling.total_cpu_count;
        spmd.processes_per_host = app.processes_per_host;
        spmd.threads_per_host = app.threads_per_host;
        spmd.variation = match app.parallelism {
            Parallelism::Mpi => Some(SpmdVariation::Mpi),
            Parallelism::OpenMp => Some(SpmdVariation::OpenMp),
            Parallelism::Serial => None,
        };
    }

    for (name, value) in &app.environment {
        definition.add_environment_variable(name.clone(), value.clone());
    }
}

fn add_resources(definition: &mut JobDefinition, scheduling: &ResourceScheduling) -> Result<()> {
    if let Some(memory) = scheduling.total_physical_memory {
        definition.get_or_create_resources().individual_physical_memory =
            Some(RangeRequirement::exact(memory as f64));
    }
    if let Some(nodes) = scheduling.node_count {
        definition.get_or_create_resources().total_resource_count = Some(RangeRequirement::exact(nodes as f64));
    }
    if let Some(minutes) = scheduling.wall_time_limit {
        definition.get_or_create_resources().individual_cpu_time =
            Some(RangeRequirement::exact(minutes as f64 * 60.0));
    }
    if let Some(cpus) = scheduling.total_cpu_count {
        let per_node = cpus / scheduling.node_count.unwrap_or(1).max(1);
        definition.get_or_create_resources().individual_cpu_count = Some(RangeRequirement::exact(per_node as f64));
    }

    if let Some(queue) = scheduling
        .queue_name
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case("default"))
    {
        definition.add_named_resource(QUEUE_RESOURCE, queue);
    }

    if let Some(arch) = scheduling.cpu_architecture.as_deref().filter(|a| !a.is_empty()) {
        definition.get_or_create_resources().cpu_architecture = Some(arch.to_string());
    }
    if let Some(os) = scheduling.operating_system.as_deref().filter(|o| !o.is_empty()) {
        definition.get_or_create_resources().operating_system = Some(os.to_string());
    }
    for host in &scheduling.candidate_hosts {
        definition.add_candidate_host(host.clone());
    }
    if let Some(speed) = &scheduling.individual_cpu_speed {
        definition.get_or_create_resources().individual_cpu_speed =
            Some(RangeRequirement::from_range_value("IndividualCPUSpeed", speed)?);
    }
    if let Some(disk) = &scheduling.individual_disk_space {
        definition.get_or_create_resources().individual_disk_space =
            Some(RangeRequirement::from_range_value("IndividualDiskSpace", disk)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CreationFlag;
    use crate::error::DocumentBuildError;
    use unigrid_types::{
        ApplicationDescriptor, InputDataObject, JobSubmissionProtocol, OutputDataObject, RangeValue,
    };

    fn context() -> ProcessExecutionContext {
        let app = ApplicationDescriptor {
            name: "gromacs".into(),
            version: Some("2023.1".into()),
            description: Some("molecular dynamics".into()),
            executable: "/opt/gromacs/bin/gmx".into(),
            arguments: vec!["mdrun".into(), "-deffnm".into(), "md".into()],
            environment: vec![("OMP_NUM_THREADS".into(), "2".into())],
            ..Default::default()
        };
        let mut ctx = ProcessExecutionContext::new("proc-7", "exp-7", app, JobSubmissionProtocol::Unicore);
        ctx.project_name = Some("chem-42".into());
        ctx
    }

    fn resources(def: &JobDefinition) -> &crate::document::Resources {
        def.description.resources.as_ref().unwrap()
    }

    #[test]
    fn test_resource_mapping() {
        let mut ctx = context();
        ctx.scheduling = ResourceScheduling {
            total_cpu_count: Some(16),
            node_count: Some(4),
            total_physical_memory: Some(2048),
            wall_time_limit: Some(30),
            ..Default::default()
        };

        let def = build(&ctx, None).unwrap();
        let res = resources(&def);
        assert_eq!(res.individual_cpu_count, Some(RangeRequirement::exact(4.0)));
        assert_eq!(res.total_resource_count, Some(RangeRequirement::exact(4.0)));
        assert_eq!(res.individual_cpu_time, Some(RangeRequirement::exact(1800.0)));
        assert_eq!(res.individual_physical_memory, Some(RangeRequirement::exact(2048.0)));
        assert!(res.named_resources.is_empty());
        assert!(def.description.data_staging.is_empty());
    }

    #[test]
    fn test_zero_nodes_divides_by_one() {
        let mut ctx = context();
        ctx.scheduling.total_cpu_count = Some(12);
        ctx.scheduling.node_count = Some(0);

        let def = build(&ctx, None).unwrap();
        assert_eq!(resources(&def).individual_cpu_count, Some(RangeRequirement::exact(12.0)));
    }

    #[test]
    fn test_default_queue_is_not_requested() {
        for queue in ["Default", "default", "DEFAULT", ""] {
            let mut ctx = context();
            ctx.scheduling.queue_name = Some(queue.into());
            let def = build(&ctx, None).unwrap();
            let named = def
                .description
                .resources
                .as_ref()
                .map(|r| r.named_resources.len())
                .unwrap_or(0);
            assert_eq!(named, 0, "queue {queue:?}");
        }

        let mut ctx = context();
        ctx.scheduling.queue_name = Some("batch".into());
        let def = build(&ctx, None).unwrap();
        let named = &resources(&def).named_resources;
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name, QUEUE_RESOURCE);
        assert_eq!(named[0].value, "batch");
    }

    #[test]
    fn test_identification_and_posix_application() {
        let def = build(&context(), None).unwrap();
        let ident = def.description.identification.as_ref().unwrap();
        assert_eq!(ident.projects, vec!["chem-42".to_string()]);
        assert_eq!(ident.job_name.as_deref(), Some("gromacs"));
        assert_eq!(ident.description.as_deref(), Some("molecular dynamics"));

        let app = def.description.application.as_ref().unwrap();
        assert_eq!(app.version.as_deref(), Some("2023.1"));
        let variant = app.variant.as_ref().unwrap();
        assert!(matches!(variant, ApplicationVariant::Posix(_)));
        let cmd = variant.command_line();
        assert_eq!(cmd.arguments.len(), 3);
        assert_eq!(cmd.output.as_deref(), Some("stdout"));
        assert_eq!(cmd.environment[0].name, "OMP_NUM_THREADS");
    }

    #[test]
    fn test_mpi_application_is_spmd() {
        let mut ctx = context();
        ctx.application.parallelism = Parallelism::Mpi;
        ctx.application.processes_per_host = Some(8);
        ctx.scheduling.total_cpu_count = Some(32);

        let def = build(&ctx, None).unwrap();
        match def.application_variant() {
            Some(ApplicationVariant::Spmd(spmd)) => {
                assert_eq!(spmd.number_of_processes, Some(32));
                assert_eq!(spmd.processes_per_host, Some(8));
                assert_eq!(spmd.variation, Some(SpmdVariation::Mpi));
                assert_eq!(spmd.command.environment.len(), 1);
            }
            other => panic!("expected SPMD application, got {other:?}"),
        }
    }

    #[test]
    fn test_data_staging_entries() {
        let mut ctx = context();
        ctx.inputs = vec![
            InputDataObject {
                name: "topology".into(),
                kind: InputDataType::Uri,
                value: "file:///home/alice/topol.tpr".into(),
                required: true,
            },
            InputDataObject {
                name: "forcefield".into(),
                kind: InputDataType::Uri,
                value: "gsiftp://data.example.org/ff/amber.itp".into(),
                required: false,
            },
            InputDataObject {
                name: "steps".into(),
                kind: InputDataType::String,
                value: "5000".into(),
                required: false,
            },
        ];
        ctx.outputs = vec![
            OutputDataObject::uri("trajectory", "md.xtc"),
            OutputDataObject::uri("unset", ""),
        ];

        let generator = JobDescriptionGenerator::new(&JsdlConfig {
            stage_in_flags: 1,
            stage_out_flags: 32,
        });
        let def = generator.build(&ctx, Some("https://grid.example.org/sms")).unwrap();
        let staging = &def.description.data_staging;
        assert_eq!(staging.len(), 3);

        assert_eq!(staging[0].file_name, "topol.tpr");
        assert_eq!(
            staging[0].source.as_deref(),
            Some("BFT:https://grid.example.org/sms#/topol.tpr")
        );
        assert_eq!(staging[0].creation_flag, CreationFlag::Overwrite);

        assert_eq!(
            staging[1].source.as_deref(),
            Some("gsiftp://data.example.org/ff/amber.itp")
        );

        assert_eq!(staging[2].file_name, "md.xtc");
        assert_eq!(
            staging[2].target.as_deref(),
            Some("BFT:https://grid.example.org/sms#/md.xtc")
        );
        assert_eq!(staging[2].creation_flag, CreationFlag::DontOverwrite);
        assert!(staging[2].delete_on_termination);
    }

    #[test]
    fn test_unnamed_staging_values_are_skipped() {
        let mut ctx = context();
        let before = build(&ctx, Some("https://sms")).unwrap().description.data_staging.len();
        ctx.inputs.push(InputDataObject {
            name: "blank".into(),
            kind: InputDataType::Uri,
            value: "  ".into(),
            required: true,
        });
        ctx.inputs.push(InputDataObject {
            name: "root".into(),
            kind: InputDataType::Uri,
            value: "/".into(),
            required: false,
        });
        ctx.outputs.push(OutputDataObject::uri("nameless", "//"));

        let def = build(&ctx, Some("https://sms")).unwrap();
        assert_eq!(def.description.data_staging.len(), before);
        assert!(build(&ctx, None).is_ok());
    }

    #[test]
    fn test_range_requirements() {
        let mut ctx = context();
        ctx.scheduling.individual_cpu_speed = Some(RangeValue::at_least(2.5e9, true));
        ctx.scheduling.cpu_architecture = Some("x86_64".into());
        ctx.scheduling.candidate_hosts = vec!["node01".into(), "node02".into()];

        let def = build(&ctx, None).unwrap();
        let res = resources(&def);
        assert!(matches!(res.individual_cpu_speed, Some(RangeRequirement::Ranged { .. })));
        assert_eq!(res.cpu_architecture.as_deref(), Some("x86_64"));
        assert_eq!(res.candidate_hosts.len(), 2);

        ctx.scheduling.individual_disk_space = Some(RangeValue::default());
        assert_eq!(
            build(&ctx, None).unwrap_err(),
            DocumentBuildError::UnpopulatedRequirement("IndividualDiskSpace".into())
        );
    }
}
