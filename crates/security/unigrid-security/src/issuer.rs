use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tokio_util::sync::CancellationToken;
use unigrid_config::{IdentityPolicy, UnigridConfig};

use crate::ca::{normalize_user_dn, CertificateAuthority, IssueOptions};
use crate::credential::Credential;
use crate::error::{Result, SecurityError};
use crate::myproxy::MyProxyClient;
use crate::trust::TrustValidator;

/// Source of fresh credentials when the credential store has none
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Obtain a new credential for the user identified by `user_dn`
    async fn issue(&self, user_dn: Option<&str>, cancel: &CancellationToken) -> Result<Credential>;

    /// Short name used in log lines
    fn name(&self) -> &'static str;
}

/// Retrieves credentials from a MyProxy server
pub struct MyProxyIssuer {
    client: MyProxyClient,
}

impl MyProxyIssuer {
    pub fn new(client: MyProxyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialIssuer for MyProxyIssuer {
    async fn issue(&self, _user_dn: Option<&str>, cancel: &CancellationToken) -> Result<Credential> {
        let result = self.client.logon(cancel).await?;
        Ok(result.credential)
    }

    fn name(&self) -> &'static str {
        "myproxy"
    }
}

/// Issues short-lived certificates from a local CA
pub struct ShortLivedIssuer {
    authority: Arc<CertificateAuthority>,
    options: IssueOptions,
    default_user_dn: String,
}

impl ShortLivedIssuer {
    pub fn new(authority: CertificateAuthority, options: IssueOptions, default_user_dn: impl Into<String>) -> Self {
        Self {
            authority: Arc::new(authority),
            options,
            default_user_dn: default_user_dn.into(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for ShortLivedIssuer {
    async fn issue(&self, user_dn: Option<&str>, cancel: &CancellationToken) -> Result<Credential> {
        let subject = normalize_user_dn(user_dn, &self.default_user_dn);
        info!("Generating short-lived certificate for {}", subject);

        let authority = self.authority.clone();
        let options = self.options.clone();
        let task = tokio::task::spawn_blocking(move || authority.issue(&subject, &options));
        tokio::select! {
            _ = cancel.cancelled() => Err(SecurityError::Cancelled {
                operation: "certificate issuance".into(),
            }),
            joined = task => joined
                .map_err(|e| SecurityError::CertificateBuild(format!("certificate issuance task failed: {e}")))?,
        }
    }

    fn name(&self) -> &'static str {
        "short-lived-ca"
    }
}

/// Build the issuer selected by the configured identity policy
pub fn issuer_for_policy(config: &UnigridConfig, trust: &TrustValidator) -> Result<Arc<dyn CredentialIssuer>> {
    match config.security.identity_policy {
        IdentityPolicy::StoreTrust => {
            let client = MyProxyClient::new(config.myproxy.clone(), trust.clone())
                .with_signature_algorithm(config.security.signature_algorithm);
            Ok(Arc::new(MyProxyIssuer::new(client)))
        }
        IdentityPolicy::AutoGenerate => {
            let authority = CertificateAuthority::from_config(&config.security)?;
            Ok(Arc::new(ShortLivedIssuer::new(
                authority,
                IssueOptions::from_config(&config.security),
                config.security.default_user_dn.clone(),
            )))
        }
    }
}
