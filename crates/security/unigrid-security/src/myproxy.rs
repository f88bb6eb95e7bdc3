//! Client for the MyProxy online credential server.
//!
//! A logon runs over a single TLS connection:
//!
//! 1. the client sends a `0` byte followed by newline terminated
//!    `VERSION`, `COMMAND`, `USERNAME`, `PASSPHRASE`, `LIFETIME` and an
//!    optional `CRED_NAME` line;
//! 2. the server echoes the version and answers `RESPONSE=<code>`, followed
//!    by `ERROR=` lines on failure or `TRUSTED_CERTS`/`FILEDATA_` lines on
//!    success, terminated by a NUL byte;
//! 3. the client sends a DER encoded PKCS#10 request for a fresh key;
//! 4. the server replies with a count byte and that many DER certificates.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use rsa::pkcs1v15::{Signature, SigningKey};
use rsa::RsaPrivateKey;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use sha1::Sha1;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use unigrid_config::{MyProxyConfig, SignatureAlgorithm};
use unigrid_types::run_bounded;
use x509_cert::builder::{Builder, RequestBuilder};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use crate::ca::{generate_key, parse_dn, public_key_of};
use crate::credential::Credential;
use crate::error::{Result, SecurityError};
use crate::trust::TrustValidator;

pub const PROTOCOL_VERSION: &str = "VERSION=MYPROXYv2";
const GET_COMMAND: &str = "COMMAND=0";
const USERNAME: &str = "USERNAME=";
const PASSPHRASE: &str = "PASSPHRASE=";
const LIFETIME: &str = "LIFETIME=";
const CRED_NAME: &str = "CRED_NAME=";
const RESPONSE: &str = "RESPONSE=";
const ERROR: &str = "ERROR=";
const TRUSTED_CERTS: &str = "TRUSTED_CERTS=";
const FILEDATA: &str = "FILEDATA_";

/// The server overwrites the subject of the request, so any DN will do
const PLACEHOLDER_DN: &str = "CN=ignore";

/// Trust root file shipped by the server along with a successful logon
#[derive(Debug, Clone)]
pub struct TrustRoot {
    pub name: String,
    pub data: Vec<u8>,
}

impl TrustRoot {
    /// Certificates contained in the file, if it is PEM encoded
    pub fn certificates(&self) -> Vec<CertificateDer<'static>> {
        CertificateDer::pem_slice_iter(&self.data)
            .filter_map(|cert| cert.ok())
            .collect()
    }
}

/// Outcome of a successful logon
#[derive(Debug, Clone)]
pub struct LogonResult {
    pub credential: Credential,
    pub trust_roots: Vec<TrustRoot>,
}

/// MyProxy client for a single configured server
#[derive(Clone)]
pub struct MyProxyClient {
    config: MyProxyConfig,
    trust: TrustValidator,
    algorithm: SignatureAlgorithm,
}

impl MyProxyClient {
    pub fn new(config: MyProxyConfig, trust: TrustValidator) -> Self {
        Self {
            config,
            trust,
            algorithm: SignatureAlgorithm::default(),
        }
    }

    /// Signature algorithm used for the certificate request
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn config(&self) -> &MyProxyConfig {
        &self.config
    }

    /// Connect to the server, authenticate it against the trust roots and
    /// retrieve a credential.
    pub async fn logon(&self, cancel: &CancellationToken) -> Result<LogonResult> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        debug!("Connecting to MyProxy server {}", address);

        let tcp = run_bounded(cancel, Some(self.config.connect_timeout()), TcpStream::connect(&address))
            .await
            .map_err(|reason| SecurityError::interrupted("MyProxy connect", reason))?
            .map_err(|e| SecurityError::Connection(format!("failed to connect to {address}: {e}")))?;

        let server_name = ServerName::try_from(self.config.host.clone())
            .map_err(|e| SecurityError::Configuration(format!("invalid MyProxy host name: {e}")))?;
        let connector = TlsConnector::from(self.tls_config()?);
        let tls = run_bounded(
            cancel,
            Some(self.config.handshake_timeout()),
            connector.connect(server_name, tcp),
        )
        .await
        .map_err(|reason| SecurityError::interrupted("MyProxy TLS handshake", reason))?
        .map_err(|e| SecurityError::Connection(format!("TLS handshake with {address} failed: {e}")))?;

        self.logon_over(tls, cancel).await
    }

    /// Run the logon exchange over an established, already secured stream
    pub async fn logon_over<S>(&self, stream: S, cancel: &CancellationToken) -> Result<LogonResult>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut stream = BufStream::new(stream);
        let result = run_bounded(cancel, Some(self.config.io_timeout()), self.exchange(&mut stream))
            .await
            .map_err(|reason| SecurityError::interrupted("MyProxy logon", reason))?;
        if let Err(e) = stream.shutdown().await {
            debug!("MyProxy connection shutdown: {}", e);
        }
        result
    }

    fn tls_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| SecurityError::Configuration(format!("TLS config error: {e}")))?
            .with_root_certificates(self.trust.root_store())
            .with_no_client_auth();
        Ok(Arc::new(config))
    }

    async fn exchange<S>(&self, stream: &mut S) -> Result<LogonResult>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.send_request(stream).await?;
        let trust_roots = read_response(stream).await?;
        info!(
            "MyProxy logon for {} succeeded ({} trust root(s))",
            self.config.username,
            trust_roots.len()
        );

        let key_size = self.config.key_size;
        let key = tokio::task::spawn_blocking(move || generate_key(key_size))
            .await
            .map_err(|e| SecurityError::CertificateBuild(format!("key generation task failed: {e}")))??;
        let request = certificate_request(&key, self.algorithm)?;
        write_all(stream, &request).await?;

        let chain = read_certificates(stream).await?;
        let leaf = Certificate::from_der(&chain[0])
            .map_err(|e| SecurityError::Protocol(format!("invalid certificate from server: {e}")))?;
        if public_key_of(&leaf).ok().as_ref() != Some(&key.to_public_key()) {
            return Err(SecurityError::Protocol(
                "server certificate does not match the requested key".into(),
            ));
        }

        let credential = Credential::from_der_chain(chain, key)?;
        info!(
            "Received credential {} ({}) from MyProxy",
            credential.subject(),
            credential.fingerprint()
        );
        Ok(LogonResult {
            credential,
            trust_roots,
        })
    }

    async fn send_request<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut request = String::new();
        request.push('0');
        for line in [
            PROTOCOL_VERSION.to_string(),
            GET_COMMAND.to_string(),
            format!("{USERNAME}{}", self.config.username),
            format!("{PASSPHRASE}{}", self.config.passphrase),
            format!("{LIFETIME}{}", self.config.lifetime_secs),
        ] {
            request.push_str(&line);
            request.push('\n');
        }
        if let Some(name) = &self.config.credential_name {
            request.push_str(CRED_NAME);
            request.push_str(name);
            request.push('\n');
        }
        write_all(stream, request.as_bytes()).await
    }
}

async fn write_all<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(bytes)
        .await
        .map_err(|e| SecurityError::Connection(format!("write to MyProxy server failed: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| SecurityError::Connection(format!("write to MyProxy server failed: {e}")))
}

/// Read a line terminated by newline, NUL or end of stream.
///
/// An empty line reads as `None`.
async fn read_line<S>(stream: &mut S) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        match stream.read_u8().await {
            Ok(b'\n') | Ok(0) => break,
            Ok(byte) => line.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(SecurityError::Connection(format!("read from MyProxy server failed: {e}"))),
        }
    }
    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

async fn expect_line<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    read_line(stream)
        .await?
        .ok_or_else(|| SecurityError::Connection("MyProxy server closed the connection".into()))
}

/// Read the server's answer to the logon request
async fn read_response<S>(stream: &mut S) -> Result<Vec<TrustRoot>>
where
    S: AsyncRead + Unpin,
{
    let version = expect_line(stream).await?;
    if version != PROTOCOL_VERSION {
        return Err(SecurityError::Protocol(format!("bad MyProxy protocol VERSION string: {version}")));
    }

    let line = expect_line(stream).await?;
    let code = line
        .strip_prefix(RESPONSE)
        .filter(|code| code.len() == 1)
        .ok_or_else(|| SecurityError::Protocol(format!("bad MyProxy protocol RESPONSE string: {line}")))?;

    match code {
        "0" => {}
        "1" => {
            let mut message = String::from("MyProxy logon failed");
            while let Some(line) = read_line(stream).await? {
                if let Some(error) = line.strip_prefix(ERROR) {
                    message.push('\n');
                    message.push_str(error);
                }
            }
            warn!("{}", message.replace('\n', "; "));
            return Err(SecurityError::Authentication(message));
        }
        "2" => {
            return Err(SecurityError::Protocol(
                "MyProxy authorization RESPONSE not implemented".into(),
            ))
        }
        _ => {
            return Err(SecurityError::Protocol(format!(
                "unknown MyProxy protocol RESPONSE string: {line}"
            )))
        }
    }

    let mut trust_roots = Vec::new();
    while let Some(line) = read_line(stream).await? {
        let Some(names) = line.strip_prefix(TRUSTED_CERTS) else {
            continue;
        };
        for name in names.split(',') {
            let prefix = format!("{FILEDATA}{name}=");
            let data_line = expect_line(stream).await?;
            let encoded = data_line.strip_prefix(&prefix).ok_or_else(|| {
                SecurityError::Protocol(format!(
                    "bad MyProxy protocol RESPONSE: expecting {prefix} but received {data_line}"
                ))
            })?;
            let data = BASE64
                .decode(encoded.trim())
                .map_err(|e| SecurityError::Protocol(format!("invalid trust root data for {name}: {e}")))?;
            trust_roots.push(TrustRoot {
                name: name.to_string(),
                data,
            });
        }
    }
    Ok(trust_roots)
}

fn certificate_request(key: &RsaPrivateKey, algorithm: SignatureAlgorithm) -> Result<Vec<u8>> {
    let subject = parse_dn(PLACEHOLDER_DN)?;
    let request = match algorithm {
        SignatureAlgorithm::Sha1WithRsa => {
            let signer = SigningKey::<Sha1>::new(key.clone());
            RequestBuilder::new(subject, &signer).and_then(|b| b.build::<Signature>())
        }
        SignatureAlgorithm::Sha256WithRsa => {
            let signer = SigningKey::<Sha256>::new(key.clone());
            RequestBuilder::new(subject, &signer).and_then(|b| b.build::<Signature>())
        }
    }
    .map_err(|e| SecurityError::CertificateBuild(format!("failed to build certificate request: {e}")))?;
    request
        .to_der()
        .map_err(|e| SecurityError::CertificateBuild(e.to_string()))
}

/// Read the count byte and the certificates that follow it
async fn read_certificates<S>(stream: &mut S) -> Result<Vec<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let count = stream
        .read_u8()
        .await
        .map_err(|e| SecurityError::Connection(format!("connection aborted before certificates: {e}")))?;
    if count == 0 {
        return Err(SecurityError::Protocol("bad number of certificates sent by server".into()));
    }

    let mut chain = Vec::with_capacity(count as usize);
    for index in 0..count {
        let der = read_der_object(stream).await.map_err(|e| {
            SecurityError::Protocol(format!("failed to read certificate {} of {count}: {e}", index + 1))
        })?;
        chain.push(der);
    }
    Ok(chain)
}

/// Largest DER object accepted off the wire
const MAX_DER_LENGTH: usize = 1 << 20;

/// Read one complete DER TLV from the stream
pub async fn read_der_object<S>(stream: &mut S) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let tag = stream.read_u8().await?;
    let first = stream.read_u8().await?;
    let mut object = vec![tag, first];

    let length = if first & 0x80 == 0 {
        first as usize
    } else {
        let octets = (first & 0x7f) as usize;
        if octets == 0 || octets > 4 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unsupported DER length encoding",
            ));
        }
        let mut bytes = vec![0u8; octets];
        stream.read_exact(&mut bytes).await?;
        object.extend_from_slice(&bytes);
        bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
    };
    if length > MAX_DER_LENGTH {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "DER object too large"));
    }

    let start = object.len();
    object.resize(start + length, 0);
    stream.read_exact(&mut object[start..]).await?;
    Ok(object)
}
