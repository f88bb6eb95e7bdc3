//! Registry publication of staged outputs.
//!
//! Clients come from a [`RegistryConnector`] pool and are handed back through
//! a [`RegistryLease`] when it drops, so a failed append still releases them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{debug, error, info};
use unigrid_types::OutputDataObject;

use crate::error::{RegistryError, Result, StagingError};

/// Registry entity the outputs are attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    ProcessOutput,
    ExperimentOutput,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn append_process_outputs(
        &self,
        kind: OutputKind,
        outputs: &[OutputDataObject],
        experiment_id: &str,
    ) -> std::result::Result<(), RegistryError>;
}

/// Pool of registry clients
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn acquire(&self) -> std::result::Result<Arc<dyn RegistryClient>, RegistryError>;

    /// Return a client obtained from [`acquire`](Self::acquire)
    fn release(&self, client: Arc<dyn RegistryClient>);
}

/// A pooled client, released back to its connector on drop
pub struct RegistryLease<'a> {
    connector: &'a dyn RegistryConnector,
    client: Option<Arc<dyn RegistryClient>>,
}

impl<'a> RegistryLease<'a> {
    pub async fn acquire(connector: &'a dyn RegistryConnector) -> std::result::Result<Self, RegistryError> {
        let client = connector.acquire().await?;
        Ok(Self {
            connector,
            client: Some(client),
        })
    }

    pub fn client(&self) -> Option<&dyn RegistryClient> {
        self.client.as_deref()
    }
}

impl Drop for RegistryLease<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.connector.release(client);
        }
    }
}

/// Append `outputs` to the experiment's process outputs.
///
/// Nothing is sent for an empty list.
pub async fn publish(outputs: &[OutputDataObject], experiment_id: &str, connector: &dyn RegistryConnector) -> Result<()> {
    if outputs.is_empty() {
        debug!("No outputs to publish for experiment {}", experiment_id);
        return Ok(());
    }

    let lease = RegistryLease::acquire(connector).await?;
    let client = lease
        .client()
        .ok_or_else(|| RegistryError::Unavailable("lease holds no client".to_string()))?;
    if let Err(e) = client
        .append_process_outputs(OutputKind::ProcessOutput, outputs, experiment_id)
        .await
    {
        error!("Failed to publish {} outputs for experiment {}: {}", outputs.len(), experiment_id, e);
        return Err(StagingError::Registry(e));
    }
    info!("Published {} outputs for experiment {}", outputs.len(), experiment_id);
    Ok(())
}

/// In-memory registry acting as both the pool and its single client
#[derive(Default)]
pub struct MemoryRegistry {
    records: RwLock<HashMap<(OutputKind, String), Vec<OutputDataObject>>>,
    leased: AtomicUsize,
    released: AtomicUsize,
    reject: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following append fail
    pub fn reject_appends(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn outputs(&self, kind: OutputKind, experiment_id: &str) -> Vec<OutputDataObject> {
        self.records
            .read()
            .map(|records| records.get(&(kind, experiment_id.to_string())).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Leases handed out and not yet released
    pub fn outstanding(&self) -> usize {
        self.leased.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }

    pub fn leases(&self) -> usize {
        self.leased.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn append_process_outputs(
        &self,
        kind: OutputKind,
        outputs: &[OutputDataObject],
        experiment_id: &str,
    ) -> std::result::Result<(), RegistryError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(RegistryError::Rejected(format!("experiment {}", experiment_id)));
        }
        let mut records = self
            .records
            .write()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
        records
            .entry((kind, experiment_id.to_string()))
            .or_default()
            .extend_from_slice(outputs);
        Ok(())
    }
}

#[async_trait]
impl RegistryConnector for Arc<MemoryRegistry> {
    async fn acquire(&self) -> std::result::Result<Arc<dyn RegistryClient>, RegistryError> {
        self.leased.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }

    fn release(&self, _client: Arc<dyn RegistryClient>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> Vec<OutputDataObject> {
        vec![OutputDataObject::uri("result", "/data/out/result.dat")]
    }

    #[tokio::test]
    async fn test_publish_appends_and_releases() {
        let registry = MemoryRegistry::new();
        publish(&outputs(), "exp-1", &registry).await.unwrap();

        assert_eq!(registry.outputs(OutputKind::ProcessOutput, "exp-1"), outputs());
        assert_eq!(registry.leases(), 1);
        assert_eq!(registry.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_publish_releases_on_error() {
        let registry = MemoryRegistry::new();
        registry.reject_appends(true);

        let result = publish(&outputs(), "exp-1", &registry).await;
        assert!(matches!(result, Err(StagingError::Registry(RegistryError::Rejected(_)))));
        assert_eq!(registry.leases(), 1);
        assert_eq!(registry.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_empty_publish_skips_registry() {
        let registry = MemoryRegistry::new();
        publish(&[], "exp-1", &registry).await.unwrap();
        assert_eq!(registry.leases(), 0);
    }
}
