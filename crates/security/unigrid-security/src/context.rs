use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use unigrid_config::{ClientConfig, SecurityConfig};
use unigrid_types::{run_bounded, JobSubmissionProtocol, ProcessExecutionContext};

use crate::credential::Credential;
use crate::error::{Result, SecurityError};
use crate::issuer::CredentialIssuer;
use crate::store::{CredentialStoreGateway, StoredCredential};
use crate::trust::TrustValidator;

/// Upper bound for a single credential store lookup
const STORE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Message handlers a job submission client attaches to outgoing requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutHandler {
    /// Attaches the proxy certificate to each request (UNICORE)
    ProxyCertificate,
}

/// Everything a job submission client needs to talk to the compute resource
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    pub protocol: JobSubmissionProtocol,
    pub credential: Credential,
    pub trust: TrustValidator,
    pub connection_timeout: Duration,
    pub socket_timeout: Duration,
    pub sign_messages: bool,
    pub extend_trust_delegation: bool,
    pub out_handlers: Vec<OutHandler>,
}

impl ClientConfiguration {
    /// Mutual TLS configuration presenting the credential and trusting the
    /// validator's roots
    pub fn tls_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| SecurityError::Configuration(format!("TLS config error: {e}")))?
            .with_root_certificates(self.trust.root_store())
            .with_client_auth_cert(
                self.credential.certificate_chain().to_vec(),
                self.credential.private_key_der()?,
            )
            .map_err(|e| SecurityError::Configuration(format!("client certificate rejected: {e}")))?;
        Ok(Arc::new(config))
    }
}

/// Capability to authenticate a job submission
#[async_trait]
pub trait SecurityContext: Send + Sync {
    /// A usable credential for the job, fetching or renewing as needed
    async fn credential(&self, cancel: &CancellationToken) -> Result<Credential>;

    /// Client settings built around the current credential
    async fn client_configuration(&self, cancel: &CancellationToken) -> Result<ClientConfiguration>;
}

/// X.509 security context for one process.
///
/// Tries the tenant's credential store first and falls back to the
/// configured issuer. Issued credentials are cached for the lifetime of the
/// context and replaced wholesale once they stop being valid.
pub struct X509SecurityContext {
    protocol: JobSubmissionProtocol,
    tenant_id: String,
    token_id: String,
    user_dn: Option<String>,
    config: SecurityConfig,
    client: ClientConfig,
    trust: TrustValidator,
    store: Option<Arc<dyn CredentialStoreGateway>>,
    issuer: Arc<dyn CredentialIssuer>,
    cached: Mutex<Option<Credential>>,
}

impl X509SecurityContext {
    pub fn new(
        context: &ProcessExecutionContext,
        config: SecurityConfig,
        trust: TrustValidator,
        issuer: Arc<dyn CredentialIssuer>,
    ) -> Self {
        Self {
            protocol: context.job_submission_protocol,
            tenant_id: context.gateway_id.clone(),
            token_id: context.credential_token.clone(),
            user_dn: context.user_dn.clone(),
            config,
            client: ClientConfig::default(),
            trust,
            store: None,
            issuer,
            cached: Mutex::new(None),
        }
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStoreGateway>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_client_config(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn protocol(&self) -> JobSubmissionProtocol {
        self.protocol
    }

    async fn from_store(&self, cancel: &CancellationToken) -> Result<Option<Credential>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let lookup = run_bounded(
            cancel,
            Some(STORE_LOOKUP_TIMEOUT),
            store.get(&self.tenant_id, &self.token_id),
        )
        .await;
        let stored = match lookup {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                warn!(
                    "Credential store lookup failed for token {} of {}: {}",
                    self.token_id, self.tenant_id, e
                );
                return Ok(None);
            }
            Err(reason) => {
                let err = SecurityError::interrupted("credential store lookup", reason);
                if matches!(err, SecurityError::Cancelled { .. }) {
                    return Err(err);
                }
                warn!("{}", err);
                return Ok(None);
            }
        };

        match stored {
            Some(StoredCredential::Certificate {
                certificate_pem,
                private_key_pem,
                key_password,
            }) => match Credential::from_pem(&certificate_pem, &private_key_pem, key_password.as_deref()) {
                Ok(credential) => {
                    debug!(
                        "Using stored certificate {} for token {}",
                        credential.fingerprint(),
                        self.token_id
                    );
                    Ok(Some(credential))
                }
                Err(e) => {
                    warn!("Stored certificate for token {} is unusable: {}", self.token_id, e);
                    Ok(None)
                }
            },
            Some(other) => {
                warn!(
                    "Credential store holds a {} credential for token {}, not a certificate",
                    other.kind(),
                    self.token_id
                );
                Ok(None)
            }
            None => {
                warn!(
                    "No credential found in store for token {} of {}",
                    self.token_id, self.tenant_id
                );
                Ok(None)
            }
        }
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Credential> {
        info!("Fetching new credential via {}", self.issuer.name());
        let credential = self
            .issuer
            .issue(self.user_dn.as_deref(), cancel)
            .await
            .map_err(|e| {
                error!("Credential retrieval via {} failed: {}", self.issuer.name(), e);
                match e {
                    SecurityError::Cancelled { .. } => e,
                    e => SecurityError::Credential(format!("no usable credential: {e}")),
                }
            })?;

        if !credential.is_valid_at(SystemTime::now(), Duration::ZERO) {
            error!("Freshly issued credential {} is not valid", credential.fingerprint());
            return Err(SecurityError::Credential("no usable credential".into()));
        }
        info!(
            "Obtained credential {} for {}, valid until {}",
            credential.fingerprint(),
            credential.subject(),
            DateTime::<Utc>::from(credential.not_after()).to_rfc3339()
        );
        Ok(credential)
    }
}

#[async_trait]
impl SecurityContext for X509SecurityContext {
    async fn credential(&self, cancel: &CancellationToken) -> Result<Credential> {
        if let Some(credential) = self.from_store(cancel).await? {
            return Ok(credential);
        }

        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref() {
            let now = SystemTime::now();
            let mut refetch = false;

            if credential.remaining_validity(now) < self.config.renewal_threshold() {
                if self.config.renewal_enabled {
                    info!(
                        "Credential {} is close to expiry, renewing",
                        credential.fingerprint()
                    );
                    refetch = true;
                } else {
                    warn!(
                        "Credential {} expires in {}s, below the renewal threshold",
                        credential.fingerprint(),
                        credential.remaining_validity(now).as_secs()
                    );
                }
            }

            if !credential.is_valid_at(now, self.config.minimum_validity()) {
                warn!(
                    "Credential {} failed the validity check, fetching a new one",
                    credential.fingerprint()
                );
                refetch = true;
            }

            if !refetch {
                return Ok(credential.clone());
            }
        }

        let credential = self.fetch(cancel).await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    async fn client_configuration(&self, cancel: &CancellationToken) -> Result<ClientConfiguration> {
        let credential = self.credential(cancel).await?;
        let out_handlers = match self.protocol {
            JobSubmissionProtocol::Unicore => vec![OutHandler::ProxyCertificate],
            JobSubmissionProtocol::Globus => Vec::new(),
        };

        Ok(ClientConfiguration {
            protocol: self.protocol,
            credential,
            trust: self.trust.clone(),
            connection_timeout: Duration::from_millis(self.client.connection_timeout_ms),
            socket_timeout: Duration::from_millis(self.client.socket_timeout_ms),
            sign_messages: self.client.sign_messages,
            extend_trust_delegation: self.client.extend_trust_delegation,
            out_handlers,
        })
    }
}
