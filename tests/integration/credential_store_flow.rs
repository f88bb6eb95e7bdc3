use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use tokio_util::sync::CancellationToken;
use unigrid_config::{IdentityPolicy, UnigridConfig};
use unigrid_security::ca::encode_certificate_pem;
use unigrid_security::{
    issuer_for_policy, CertificateAuthority, IssueOptions, MemoryCredentialStore, SecurityContext, SecurityError,
    StoredCredential, TrustValidator, X509SecurityContext,
};
use unigrid_types::{ApplicationDescriptor, JobSubmissionProtocol, ProcessExecutionContext};

const TENANT: &str = "seagrid";
const TOKEN: &str = "token-7";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Port on localhost with nothing listening
async fn closed_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

async fn store_trust_config() -> Result<UnigridConfig> {
    let mut config = UnigridConfig::default();
    config.security.identity_policy = IdentityPolicy::StoreTrust;
    config.myproxy.host = "127.0.0.1".into();
    config.myproxy.port = closed_port().await?;
    config.myproxy.connect_timeout_secs = 2;
    Ok(config)
}

fn context() -> ProcessExecutionContext {
    let mut context = ProcessExecutionContext::new(
        "proc-1",
        "exp-1",
        ApplicationDescriptor::default(),
        JobSubmissionProtocol::Globus,
    );
    context.gateway_id = TENANT.into();
    context.credential_token = TOKEN.into();
    context
}

fn stored_certificate(ca: &CertificateAuthority, subject: &str) -> Result<StoredCredential> {
    let options = IssueOptions {
        key_size: 1024,
        ..IssueOptions::default()
    };
    let credential = ca.issue(subject, &options)?;
    Ok(StoredCredential::Certificate {
        certificate_pem: encode_certificate_pem(credential.certificate_chain()),
        private_key_pem: credential.private_key().to_pkcs8_pem(LineEnding::LF)?.to_string(),
        key_password: None,
    })
}

#[tokio::test]
async fn test_stored_certificate_then_server_fallback() -> Result<()> {
    init_logging();
    let config = store_trust_config().await?;
    let ca = CertificateAuthority::self_signed("CN=Community CA", 1024, Duration::from_secs(86400))?;
    let trust = TrustValidator::from_der([ca.certificate_der().clone()])?;

    let store = MemoryCredentialStore::new();
    store
        .insert(TENANT, TOKEN, stored_certificate(&ca, "CN=bob, O=Community")?)
        .await;

    let issuer = issuer_for_policy(&config, &trust)?;
    assert_eq!(issuer.name(), "myproxy");
    let security = X509SecurityContext::new(&context(), config.security.clone(), trust, issuer)
        .with_credential_store(Arc::new(store.clone()));
    let cancel = CancellationToken::new();

    let credential = security.credential(&cancel).await?;
    assert!(credential.subject().contains("CN=bob"));

    // without a usable stored credential the MyProxy server is the only way left
    store
        .insert(
            TENANT,
            TOKEN,
            StoredCredential::Password {
                username: "bob".into(),
                password: "hunter2".into(),
            },
        )
        .await;
    let result = security.credential(&cancel).await;
    assert!(
        matches!(&result, Err(SecurityError::Credential(msg)) if msg.contains("Connection error")),
        "{result:?}"
    );

    store.remove(TENANT, TOKEN).await;
    let result = security.credential(&cancel).await;
    assert!(
        matches!(&result, Err(SecurityError::Credential(msg)) if msg.contains("Connection error")),
        "{result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_logon() -> Result<()> {
    init_logging();
    let config = store_trust_config().await?;
    let trust = TrustValidator::empty();
    let issuer = issuer_for_policy(&config, &trust)?;
    let security = X509SecurityContext::new(&context(), config.security.clone(), trust, issuer);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = security.credential(&cancel).await;
    assert!(matches!(result, Err(SecurityError::Cancelled { .. })), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn test_auto_generate_without_ca_is_a_configuration_error() {
    let mut config = UnigridConfig::default();
    config.security.identity_policy = IdentityPolicy::AutoGenerate;
    let result = issuer_for_policy(&config, &TrustValidator::empty());
    assert!(matches!(result, Err(SecurityError::Configuration(_))));
}
