use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use unigrid_config::{load_config, UnigridConfig};
use unigrid_jsdl::{ApplicationVariant, CreationFlag, JobDescriptionGenerator};
use unigrid_security::{
    issuer_for_policy, CertificateAuthority, OutHandler, SecurityContext, TrustValidator, X509SecurityContext,
};
use unigrid_staging::{LocalStorage, MemoryRegistry, OutputKind, StagingPipeline, StorageClient};
use unigrid_types::{
    ApplicationDescriptor, InputDataObject, InputDataType, JobSubmissionProtocol, OutputDataObject,
    OutputDataType, ProcessExecutionContext, ResourceScheduling,
};

const STORAGE_ENDPOINT: &str = "https://grid.example.org:8080/SITE/services/StorageManagement?res=proc-42";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Gateway installation: a CA on disk and a config file pointing at it
struct Deployment {
    dir: TempDir,
    config: UnigridConfig,
    trust: TrustValidator,
}

fn deployment() -> Result<Deployment> {
    let dir = TempDir::new()?;
    let ca = CertificateAuthority::self_signed("CN=Gateway CA, O=Unigrid", 1024, Duration::from_secs(86400))?;
    let cert_path = dir.path().join("cacert.pem");
    let key_path = dir.path().join("cakey.pem");
    ca.write_pem(&cert_path, &key_path, Some("changeit"))?;

    let config_path = dir.path().join("unigrid.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[security]
identity_policy = "auto_generate"
ca_cert_path = "{}"
ca_key_path = "{}"
ca_key_password = "changeit"
key_size = 1024
signature_algorithm = "sha256_with_rsa"

[staging]
temp_root = "{}"

[jsdl]
stage_in_flags = 1
stage_out_flags = 33
"#,
            cert_path.display(),
            key_path.display(),
            dir.path().join("staging").display()
        ),
    )?;

    let config = load_config(&config_path)?;
    let trust = TrustValidator::from_der([ca.certificate_der().clone()])?;
    Ok(Deployment { dir, config, trust })
}

fn process_context(input: &Path) -> ProcessExecutionContext {
    let application = ApplicationDescriptor {
        name: "wordcount".into(),
        version: Some("1.2".into()),
        executable: "/usr/bin/wc".into(),
        arguments: vec!["-l".into(), "input.txt".into()],
        environment: vec![("LC_ALL".into(), "C".into())],
        ..Default::default()
    };
    let mut context = ProcessExecutionContext::new("proc-42", "exp-9", application, JobSubmissionProtocol::Unicore);
    context.gateway_id = "seagrid".into();
    context.credential_token = "token-1".into();
    context.user_dn = Some("CN=alice, O=Unigrid Users".into());
    context.project_name = Some("climate".into());
    context.scheduling = ResourceScheduling {
        total_cpu_count: Some(4),
        node_count: Some(2),
        wall_time_limit: Some(30),
        queue_name: Some("batch".into()),
        ..Default::default()
    };
    context.inputs = vec![InputDataObject {
        name: "text".into(),
        kind: InputDataType::Uri,
        value: format!("file://{}", input.display()),
        required: true,
    }];
    context.outputs = vec![
        OutputDataObject::uri("counts", "counts.txt"),
        OutputDataObject::uri("histogram", "histogram.png"),
        OutputDataObject {
            name: "console".into(),
            kind: OutputDataType::Stdout,
            location: None,
            value: String::new(),
            required: false,
        },
    ];
    context
}

#[tokio::test]
async fn test_submission_round_trip() -> Result<()> {
    init_logging();
    let deployment = deployment()?;
    let remote = TempDir::new()?;
    let input = deployment.dir.path().join("input.txt");
    std::fs::write(&input, "one\ntwo\nthree\n")?;
    let context = process_context(&input);
    let cancel = CancellationToken::new();

    // credentials
    let issuer = issuer_for_policy(&deployment.config, &deployment.trust)?;
    assert_eq!(issuer.name(), "short-lived-ca");
    let security = X509SecurityContext::new(
        &context,
        deployment.config.security.clone(),
        deployment.trust.clone(),
        issuer,
    )
    .with_client_config(deployment.config.client.clone());
    let client = security.client_configuration(&cancel).await?;
    assert_eq!(client.out_handlers, vec![OutHandler::ProxyCertificate]);
    assert!(client.credential.subject().contains("CN=alice"));
    assert_eq!(client.credential.certificate_chain().len(), 2);
    assert_eq!(
        security.credential(&cancel).await?.fingerprint(),
        client.credential.fingerprint()
    );

    // job description
    let storage = LocalStorage::new(remote.path()).with_endpoint(STORAGE_ENDPOINT);
    let definition = JobDescriptionGenerator::new(&deployment.config.jsdl).build(&context, Some(storage.endpoint()))?;
    assert!(matches!(definition.application_variant(), Some(ApplicationVariant::Posix(_))));

    let staging = &definition.description.data_staging;
    assert_eq!(staging.len(), 3);
    assert_eq!(
        staging[0].source.as_deref(),
        Some(format!("BFT:{}#/input.txt", STORAGE_ENDPOINT).as_str())
    );
    assert_eq!(staging[0].creation_flag, CreationFlag::Overwrite);
    assert!(!staging[0].delete_on_termination);
    assert_eq!(
        staging[1].target.as_deref(),
        Some(format!("BFT:{}#/counts.txt", STORAGE_ENDPOINT).as_str())
    );
    assert!(staging[1].delete_on_termination);

    let xml = definition.to_xml();
    assert!(xml.contains("<jsdl:JobName>wordcount</jsdl:JobName>"));
    assert!(xml.contains("<jsdl-u:Value>batch</jsdl-u:Value>"));
    assert!(xml.contains("<jsdl:IndividualCPUCount>"));

    // stage in, run, stage out
    let pipeline = StagingPipeline::new(deployment.config.staging.clone());
    let uploaded = pipeline.upload_inputs(&context, &storage, &cancel).await?;
    assert_eq!(uploaded.files, 1);
    assert_eq!(std::fs::read_to_string(remote.path().join("input.txt"))?, "one\ntwo\nthree\n");

    std::fs::write(remote.path().join("counts.txt"), "3 input.txt\n")?;
    std::fs::write(remote.path().join("stdout"), "done\n")?;
    std::fs::write(remote.path().join("stderr"), "")?;
    std::fs::write(remote.path().join(".UNICORE_EXIT_CODE"), "0\n")?;

    let outputs = pipeline.download_outputs(&context, &storage, &cancel).await?;
    let names: Vec<_> = outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["counts", "console", "stderr", "UNICORE_EXIT_CODE"]);

    let out_dir = deployment.dir.path().join("staging/proc-42");
    assert_eq!(std::fs::read_to_string(out_dir.join("counts.txt"))?, "3 input.txt\n");
    assert_eq!(outputs[1].value, out_dir.join("stdout").display().to_string());

    // publish
    let registry = MemoryRegistry::new();
    pipeline.publish(&outputs, &context.experiment_id, &registry).await?;
    assert_eq!(registry.outputs(OutputKind::ProcessOutput, "exp-9"), outputs);
    assert_eq!(registry.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn test_context_from_orchestrator_json() -> Result<()> {
    init_logging();
    let json = serde_json::json!({
        "process_id": "proc-mpi",
        "experiment_id": "exp-1",
        "gateway_id": "seagrid",
        "project_name": null,
        "user_dn": null,
        "application": {
            "name": "lammps",
            "version": null,
            "description": "Molecular dynamics",
            "executable": "/opt/lammps/bin/lmp",
            "arguments": ["-in", "in.melt"],
            "working_directory": null,
            "parallelism": "mpi",
            "kind": null,
            "processes_per_host": 8,
            "threads_per_host": null
        },
        "scheduling": {
            "total_cpu_count": 32,
            "node_count": 0,
            "total_physical_memory": 2048,
            "wall_time_limit": null,
            "queue_name": "Default",
            "individual_disk_space": null,
            "individual_cpu_speed": null,
            "cpu_architecture": null,
            "operating_system": null
        },
        "job_submission_protocol": "globus",
        "credential_token": "t",
        "output_dir": "gsiftp://storage.example.org/home/out",
        "stdout_name": "lammps.out",
        "stderr_name": "lammps.err"
    });
    let context: ProcessExecutionContext = serde_json::from_value(json)?;

    let definition = unigrid_jsdl::build(&context, None)?;
    let Some(ApplicationVariant::Spmd(spmd)) = definition.application_variant() else {
        anyhow::bail!("expected an SPMD application");
    };
    assert_eq!(spmd.number_of_processes, Some(32));
    assert_eq!(spmd.processes_per_host, Some(8));
    assert!(definition.description.data_staging.is_empty());

    let resources = definition.description.resources.as_ref().expect("resources");
    assert!(resources.named_resources.is_empty());
    assert_eq!(
        resources.individual_cpu_count,
        Some(unigrid_jsdl::RangeRequirement::exact(32.0))
    );

    let xml = definition.to_xml();
    assert!(xml.contains("<jsdl-spmd:SPMDVariation>http://www.ogf.org/jsdl/2007/02/jsdl-spmd/MPI</jsdl-spmd:SPMDVariation>"));
    assert!(xml.contains("<jsdl-posix:Output>lammps.out</jsdl-posix:Output>"));

    let staging_root = TempDir::new()?;
    let pipeline = StagingPipeline::new(unigrid_config::StagingConfig {
        temp_root: Some(staging_root.path().to_path_buf()),
        ..Default::default()
    });
    assert_eq!(
        pipeline.resolve_output_dir(&context).await?,
        staging_root.path().join("proc-mpi")
    );
    Ok(())
}
