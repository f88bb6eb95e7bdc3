//! Per-process staging: inputs up before submission, outputs down after
//! completion, and the resulting output list published to the registry.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use unigrid_config::StagingConfig;
use unigrid_types::{
    uri, InputDataType, JobSubmissionProtocol, OutputDataObject, OutputDataType, ProcessExecutionContext, StagingUri,
};

use crate::error::{Result, TransferError};
#[cfg(feature = "metrics")]
use crate::metrics::StagingMetrics;
use crate::registry::{self, RegistryConnector};
use crate::storage::StorageClient;
use crate::transfer::{write_error, FileTransfer, TransferSummary, TransferTask, WriteMode};

pub struct StagingPipeline {
    config: StagingConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<StagingMetrics>,
}

impl StagingPipeline {
    pub fn new(config: StagingConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: StagingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    fn transfer<'a>(&self, storage: &'a dyn StorageClient) -> FileTransfer<'a> {
        let transfer = FileTransfer::new(storage, &self.config);
        #[cfg(feature = "metrics")]
        let transfer = match &self.metrics {
            Some(metrics) => transfer.with_metrics(metrics.clone()),
            None => transfer,
        };
        transfer
    }

    /// Local directory receiving the process outputs, created if absent.
    ///
    /// A plain path or host-less `file:` URI is used as declared. Remote
    /// transfer schemes, `file:` URIs naming a host, and a missing
    /// declaration all map to a directory under the temp root keyed by
    /// process id.
    pub async fn resolve_output_dir(&self, context: &ProcessExecutionContext) -> std::result::Result<PathBuf, TransferError> {
        let declared = context.output_dir.as_deref().filter(|d| !d.trim().is_empty());
        let dir = match declared.and_then(uri::local_directory) {
            Some(dir) => dir,
            None => {
                if let Some(declared) = declared {
                    debug!("Output directory {} is not local, staging under the temp root", declared);
                }
                self.config.temp_root().join(&context.process_id)
            }
        };
        fs::create_dir_all(&dir).await.map_err(|e| write_error(&dir, e))?;
        Ok(dir)
    }

    /// Upload every local file input to the job's storage.
    ///
    /// Targets are overwritten. Any failure aborts staging.
    pub async fn upload_inputs(
        &self,
        context: &ProcessExecutionContext,
        storage: &dyn StorageClient,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let transfer = self.transfer(storage);
        let mut summary = TransferSummary::default();

        for input in &context.inputs {
            let values: Vec<&str> = match input.kind {
                InputDataType::Uri => vec![input.value.trim()],
                InputDataType::UriCollection => input
                    .value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .collect(),
                InputDataType::String => continue,
            };

            for value in values {
                if !uri::is_local(value) {
                    debug!("Input {} is remote, the job fetches it itself", value);
                    continue;
                }
                let path = uri::local_file_path(value).unwrap_or_else(|| PathBuf::from(value));
                let mut task = TransferTask::new(path.display().to_string(), uri::file_name(value))
                    .with_mode(WriteMode::Overwrite);
                if task.wildcard {
                    task.destination = String::new();
                }

                match transfer.upload(&task, cancel).await {
                    Ok(uploaded) if uploaded.files > 0 => summary += uploaded,
                    Ok(_) => {
                        // nothing moved: a directory, or a wildcard matching no file
                        let e = if task.wildcard {
                            TransferError::FileNotFound(value.to_string())
                        } else {
                            TransferError::DirectoryMismatch {
                                source_path: path.display().to_string(),
                                target: format!("{}#/{}", storage.endpoint(), task.destination),
                            }
                        };
                        error!("Failed to upload input {} ({}): {}", input.name, value, e);
                        return Err(e.into());
                    }
                    Err(e) => {
                        error!("Failed to upload input {} ({}): {}", input.name, value, e);
                        return Err(e.into());
                    }
                }
            }
        }

        info!(
            "Uploaded {} input files ({} bytes) for process {} to {}",
            summary.files,
            summary.bytes,
            context.process_id,
            storage.endpoint()
        );
        Ok(summary)
    }

    /// Download the declared outputs and return the ones now present locally.
    ///
    /// A URI output that fails to download is logged and left out. Stdout and
    /// stderr are always fetched and listed; for UNICORE jobs the exit code
    /// marker is fetched as well. These auxiliary fetches never fail the call.
    pub async fn download_outputs(
        &self,
        context: &ProcessExecutionContext,
        storage: &dyn StorageClient,
        cancel: &CancellationToken,
    ) -> Result<Vec<OutputDataObject>> {
        let out_dir = self.resolve_output_dir(context).await?;
        let transfer = self.transfer(storage);
        let mut resultant = Vec::new();
        let mut stdout = None;
        let mut stderr = None;

        for output in &context.outputs {
            match output.kind {
                OutputDataType::Stdout => stdout = Some(output.clone()),
                OutputDataType::Stderr => stderr = Some(output.clone()),
                OutputDataType::Uri => {
                    let value = output.value.trim();
                    if value.is_empty() {
                        debug!("Output {} has no value, nothing to fetch", output.name);
                        continue;
                    }
                    let remote = StagingUri::parse(value).map(|u| u.path).unwrap_or_else(|_| value.to_string());
                    let mut task = TransferTask::new(remote, "").with_mode(WriteMode::Overwrite);
                    let local = if task.wildcard {
                        out_dir.clone()
                    } else {
                        out_dir.join(uri::file_name(&task.source))
                    };
                    task.destination = local.display().to_string();

                    match transfer.download(&task, cancel).await {
                        Ok(summary) if summary.files > 0 => {
                            let mut staged = output.clone();
                            staged.value = local.display().to_string();
                            resultant.push(staged);
                        }
                        Ok(_) => warn!("Dropping output {} ({}): no file was downloaded", output.name, value),
                        Err(e @ TransferError::Cancelled { .. }) => return Err(e.into()),
                        Err(e) => warn!("Dropping output {} ({}): {}", output.name, value, e),
                    }
                }
            }
        }

        let standard_streams = [
            (stdout, OutputDataType::Stdout, &self.config.stdout_remote_name, &context.stdout_name),
            (stderr, OutputDataType::Stderr, &self.config.stderr_remote_name, &context.stderr_name),
        ];
        for (declared, kind, remote, local_name) in standard_streams {
            let local = out_dir.join(local_name);
            self.fetch_auxiliary(&transfer, remote, &local, cancel).await;
            let mut entry = declared.unwrap_or_else(|| OutputDataObject {
                name: local_name.clone(),
                kind,
                location: None,
                value: String::new(),
                required: false,
            });
            entry.value = local.display().to_string();
            resultant.push(entry);
        }

        if context.job_submission_protocol == JobSubmissionProtocol::Unicore {
            let marker = &self.config.exit_code_file;
            let local = out_dir.join(marker);
            if self.fetch_auxiliary(&transfer, marker, &local, cancel).await {
                resultant.push(OutputDataObject::uri(
                    marker.trim_start_matches('.'),
                    local.display().to_string(),
                ));
            }
        }

        info!(
            "Staged {} of {} declared outputs for process {} into {}",
            resultant.len(),
            context.outputs.len(),
            context.process_id,
            out_dir.display()
        );
        Ok(resultant)
    }

    async fn fetch_auxiliary(
        &self,
        transfer: &FileTransfer<'_>,
        remote: &str,
        local: &Path,
        cancel: &CancellationToken,
    ) -> bool {
        let task = TransferTask {
            wildcard: false,
            ..TransferTask::new(remote, local.display().to_string()).with_mode(WriteMode::Overwrite)
        };
        match transfer.download(&task, cancel).await {
            Ok(summary) if summary.files > 0 => true,
            Ok(_) => {
                warn!("Could not fetch {}: not a file", remote);
                false
            }
            Err(e) => {
                warn!("Could not fetch {}: {}", remote, e);
                false
            }
        }
    }

    /// Publish staged outputs; see [`registry::publish`]
    pub async fn publish(
        &self,
        outputs: &[OutputDataObject],
        experiment_id: &str,
        connector: &dyn RegistryConnector,
    ) -> Result<()> {
        registry::publish(outputs, experiment_id, connector).await
    }
}
