//! Configuration for the unigrid adapter.
//!
//! Values are plain data handed in by whatever bootstraps the adapter; the
//! [`load_config`] helper reads them from a TOML file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use unigrid_types::TransferProtocol;

/// Top level adapter configuration
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UnigridConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub myproxy: MyProxyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub jsdl: JsdlConfig,
}

/// Where credentials come from when the credential store has none
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Trust the online credential server (MyProxy logon)
    #[default]
    StoreTrust,
    /// Issue a short-lived certificate from the local CA
    AutoGenerate,
}

/// Signature algorithm used for locally issued certificates and requests
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// Legacy consumers expect SHA-1; kept as the default for wire compatibility
    #[default]
    Sha1WithRsa,
    Sha256WithRsa,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SecurityConfig {
    #[serde(default)]
    pub identity_policy: IdentityPolicy,

    /// Directory holding trusted CA certificates (`*.0`, `*.pem`)
    pub trust_root_dir: Option<PathBuf>,

    /// PEM encoded CA certificate for short-lived certificate issuance
    pub ca_cert_path: Option<PathBuf>,

    /// PEM encoded CA private key (PKCS#1, PKCS#8 or encrypted PKCS#8)
    pub ca_key_path: Option<PathBuf>,

    /// Password protecting the CA key, if encrypted
    pub ca_key_password: Option<String>,

    #[serde(default = "default_key_size")]
    pub key_size: usize,

    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,

    /// Remaining validity below which a cached credential is due for renewal
    #[serde(default = "default_renewal_threshold_secs")]
    pub renewal_threshold_secs: u64,

    /// Renew credentials that crossed the renewal threshold. Off by default:
    /// crossing the threshold only logs a warning.
    #[serde(default)]
    pub renewal_enabled: bool,

    /// A credential with less remaining validity than this is treated as expired
    #[serde(default = "default_minimum_validity_secs")]
    pub minimum_validity_secs: u64,

    /// Subject used for generated certificates when the user has no usable DN
    #[serde(default = "default_user_dn")]
    pub default_user_dn: String,

    #[serde(default = "default_certificate_lifetime_hours")]
    pub certificate_lifetime_hours: i64,

    #[serde(default = "default_backdate_minutes")]
    pub backdate_minutes: i64,
}

fn default_key_size() -> usize {
    2048
}

fn default_renewal_threshold_secs() -> u64 {
    900
}

fn default_minimum_validity_secs() -> u64 {
    60
}

fn default_user_dn() -> String {
    "CN=unigrid-user, O=Unigrid Gateway, C=DE".to_string()
}

fn default_certificate_lifetime_hours() -> i64 {
    30
}

fn default_backdate_minutes() -> i64 {
    15
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            identity_policy: IdentityPolicy::default(),
            trust_root_dir: None,
            ca_cert_path: None,
            ca_key_path: None,
            ca_key_password: None,
            key_size: default_key_size(),
            signature_algorithm: SignatureAlgorithm::default(),
            renewal_threshold_secs: default_renewal_threshold_secs(),
            renewal_enabled: false,
            minimum_validity_secs: default_minimum_validity_secs(),
            default_user_dn: default_user_dn(),
            certificate_lifetime_hours: default_certificate_lifetime_hours(),
            backdate_minutes: default_backdate_minutes(),
        }
    }
}

impl SecurityConfig {
    pub fn renewal_threshold(&self) -> Duration {
        Duration::from_secs(self.renewal_threshold_secs)
    }

    pub fn minimum_validity(&self) -> Duration {
        Duration::from_secs(self.minimum_validity_secs)
    }
}

/// Online credential server (MyProxy) settings
#[derive(Deserialize, Debug, Clone)]
pub struct MyProxyConfig {
    #[serde(default = "default_myproxy_host")]
    pub host: String,

    #[serde(default = "default_myproxy_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub passphrase: String,

    /// Requested credential lifetime in seconds
    #[serde(default = "default_myproxy_lifetime_secs")]
    pub lifetime_secs: u32,

    pub credential_name: Option<String>,

    #[serde(default = "default_key_size")]
    pub key_size: usize,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

fn default_myproxy_host() -> String {
    "localhost".to_string()
}

fn default_myproxy_port() -> u16 {
    7512
}

fn default_myproxy_lifetime_secs() -> u32 {
    43200
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_io_timeout_secs() -> u64 {
    30
}

impl Default for MyProxyConfig {
    fn default() -> Self {
        Self {
            host: default_myproxy_host(),
            port: default_myproxy_port(),
            username: String::new(),
            passphrase: String::new(),
            lifetime_secs: default_myproxy_lifetime_secs(),
            credential_name: None,
            key_size: default_key_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl MyProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Settings of the client configuration handed to job submission clients
#[derive(Deserialize, Debug, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_http_timeout_ms")]
    pub socket_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub sign_messages: bool,

    #[serde(default = "default_true")]
    pub extend_trust_delegation: bool,
}

fn default_http_timeout_ms() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_http_timeout_ms(),
            socket_timeout_ms: default_http_timeout_ms(),
            sign_messages: true,
            extend_trust_delegation: true,
        }
    }
}

/// Data staging settings
#[derive(Deserialize, Debug, Clone)]
pub struct StagingConfig {
    /// Acceptable transfer protocols, most preferred first
    #[serde(default = "default_preferred_protocols")]
    pub preferred_protocols: Vec<TransferProtocol>,

    /// Root for per-process scratch directories; the system temp dir if unset
    pub temp_root: Option<PathBuf>,

    /// Upper bound for a single file transfer; unbounded when unset
    pub transfer_timeout_secs: Option<u64>,

    #[serde(default = "default_stdout_remote_name")]
    pub stdout_remote_name: String,

    #[serde(default = "default_stderr_remote_name")]
    pub stderr_remote_name: String,

    /// Marker file UNICORE writes with the job's exit code
    #[serde(default = "default_exit_code_file")]
    pub exit_code_file: String,
}

fn default_preferred_protocols() -> Vec<TransferProtocol> {
    vec![
        TransferProtocol::Bft,
        TransferProtocol::Rbyteio,
        TransferProtocol::Sbyteio,
    ]
}

fn default_stdout_remote_name() -> String {
    "stdout".to_string()
}

fn default_stderr_remote_name() -> String {
    "stderr".to_string()
}

fn default_exit_code_file() -> String {
    ".UNICORE_EXIT_CODE".to_string()
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            preferred_protocols: default_preferred_protocols(),
            temp_root: None,
            transfer_timeout_secs: None,
            stdout_remote_name: default_stdout_remote_name(),
            stderr_remote_name: default_stderr_remote_name(),
            exit_code_file: default_exit_code_file(),
        }
    }
}

impl StagingConfig {
    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout_secs.map(Duration::from_secs)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Job description settings
#[derive(Deserialize, Debug, Clone, Default)]
pub struct JsdlConfig {
    /// Creation flag bits for stage-in entries (1 overwrite, 2 append, 32 delete on termination)
    #[serde(default)]
    pub stage_in_flags: u32,

    /// Creation flag bits for stage-out entries
    #[serde(default)]
    pub stage_out_flags: u32,
}

/// Read and parse a TOML configuration file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<UnigridConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file from {}: {}", path.display(), e))?;
    let config: UnigridConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse TOML config from {}: {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = UnigridConfig::default();
        assert_eq!(config.myproxy.port, 7512);
        assert_eq!(config.myproxy.lifetime_secs, 43200);
        assert_eq!(config.security.signature_algorithm, SignatureAlgorithm::Sha1WithRsa);
        assert!(!config.security.renewal_enabled);
        assert_eq!(config.security.renewal_threshold(), Duration::from_secs(900));
        assert_eq!(config.staging.preferred_protocols[0], TransferProtocol::Bft);
        assert!(config.staging.transfer_timeout().is_none());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[security]
identity_policy = "auto_generate"
ca_cert_path = "/etc/unigrid/cacert.pem"
ca_key_path = "/etc/unigrid/cakey.pem"
signature_algorithm = "sha256_with_rsa"
renewal_enabled = true

[myproxy]
host = "myproxy.example.org"
username = "alice"

[staging]
preferred_protocols = ["UFTP", "BFT"]
transfer_timeout_secs = 600

[jsdl]
stage_in_flags = 33
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.security.identity_policy, IdentityPolicy::AutoGenerate);
        assert_eq!(config.security.signature_algorithm, SignatureAlgorithm::Sha256WithRsa);
        assert!(config.security.renewal_enabled);
        assert_eq!(config.security.key_size, 2048);
        assert_eq!(config.myproxy.host, "myproxy.example.org");
        assert_eq!(config.myproxy.port, 7512);
        assert_eq!(
            config.staging.preferred_protocols,
            vec![TransferProtocol::Uftp, TransferProtocol::Bft]
        );
        assert_eq!(config.staging.transfer_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.jsdl.stage_in_flags, 33);
        assert_eq!(config.client.socket_timeout_ms, 300_000);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config("/nonexistent/unigrid.toml").is_err());
    }
}
