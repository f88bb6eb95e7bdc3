//! Local certificate authority issuing short-lived user certificates.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};
use rand::Rng;
use rsa::pkcs1v15::{RsaSignatureAssociatedOid, Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::signature::Verifier;
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustls::pki_types::CertificateDer;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use unigrid_config::{SecurityConfig, SignatureAlgorithm};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::asn1::UtcTime;
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{Decode, Encode};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

use crate::credential::{decode_private_key, to_system_time, Credential};
use crate::error::{Result, SecurityError};

const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// Serial numbers are drawn from a 20 bit space
const SERIAL_BITS: u32 = 20;

/// Parameters for issuing a short-lived certificate
#[derive(Debug, Clone)]
pub struct IssueOptions {
    /// Size of the generated subject key in bits
    pub key_size: usize,

    /// Validity period counted from the backdated start
    pub lifetime: Duration,

    /// How far `not_before` lies in the past, absorbing clock skew
    pub backdate: Duration,

    pub algorithm: SignatureAlgorithm,
}

impl IssueOptions {
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            key_size: config.key_size,
            lifetime: Duration::from_secs(config.certificate_lifetime_hours.max(0) as u64 * 3600),
            backdate: Duration::from_secs(config.backdate_minutes.max(0) as u64 * 60),
            algorithm: config.signature_algorithm,
        }
    }
}

impl Default for IssueOptions {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}

/// A CA certificate together with its signing key
#[derive(Clone)]
pub struct CertificateAuthority {
    certificate: Certificate,
    certificate_der: CertificateDer<'static>,
    key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl CertificateAuthority {
    /// Assemble a CA from a DER certificate and its private key
    pub fn new(certificate_der: Vec<u8>, key: RsaPrivateKey) -> Result<Self> {
        let certificate = Certificate::from_der(&certificate_der)
            .map_err(|e| SecurityError::Configuration(format!("invalid CA certificate: {e}")))?;
        let public_key = public_key_of(&certificate)
            .map_err(|e| SecurityError::Configuration(format!("unusable CA public key: {e}")))?;
        if public_key != key.to_public_key() {
            return Err(SecurityError::Configuration(
                "CA private key does not match the CA certificate".into(),
            ));
        }

        Ok(Self {
            certificate,
            certificate_der: CertificateDer::from(certificate_der),
            key,
            public_key,
        })
    }

    /// Load the CA from PEM files. Both paths must be configured.
    pub fn load(cert_path: Option<&Path>, key_path: Option<&Path>, password: Option<&str>) -> Result<Self> {
        let cert_path = cert_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| SecurityError::Configuration("CA certificate path is not configured".into()))?;
        let key_path = key_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| SecurityError::Configuration("CA key path is not configured".into()))?;

        let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
            SecurityError::Configuration(format!("failed to read CA certificate {}: {e}", cert_path.display()))
        })?;
        let key_pem = std::fs::read_to_string(key_path).map_err(|e| {
            SecurityError::Configuration(format!("failed to read CA key {}: {e}", key_path.display()))
        })?;

        let authority = Self::from_pem(&cert_pem, &key_pem, password)?;
        info!(
            "Loaded certificate authority {} from {}",
            authority.subject(),
            cert_path.display()
        );
        Ok(authority)
    }

    /// Load the CA paths and password from the security configuration
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        Self::load(
            config.ca_cert_path.as_deref(),
            config.ca_key_path.as_deref(),
            config.ca_key_password.as_deref(),
        )
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str, password: Option<&str>) -> Result<Self> {
        let (_, der) = x509_cert::der::pem::decode_vec(cert_pem.as_bytes())
            .map_err(|e| SecurityError::Configuration(format!("invalid CA certificate PEM: {e}")))?;
        let key = decode_private_key(key_pem, password)
            .map_err(|e| SecurityError::Configuration(format!("invalid CA key: {e}")))?;
        Self::new(der, key)
    }

    /// Create a throw-away self-signed CA
    pub fn self_signed(subject: &str, key_size: usize, lifetime: Duration) -> Result<Self> {
        let key = generate_key(key_size)?;
        let subject = parse_dn(subject)?;
        let spki = spki_of(&key.to_public_key())?;
        let now = SystemTime::now();
        let validity = validity(now - Duration::from_secs(60), now + lifetime)?;

        let signer = SigningKey::<Sha256>::new(key.clone());
        let certificate = CertificateBuilder::new(Profile::Root, random_serial(), validity, subject, spki, &signer)
            .and_then(|builder| builder.build::<Signature>())
            .map_err(|e| SecurityError::CertificateBuild(format!("failed to build CA certificate: {e}")))?;
        let der = certificate
            .to_der()
            .map_err(|e| SecurityError::CertificateBuild(e.to_string()))?;
        Self::new(der, key)
    }

    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.certificate_der
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Persist the CA as a PEM certificate and a PKCS#8 key, encrypted when
    /// `password` is given, so [`load`](Self::load) can pick it up again
    pub fn write_pem(&self, cert_path: &Path, key_path: &Path, password: Option<&str>) -> Result<()> {
        let key_pem = match password {
            Some(password) => self
                .key
                .to_pkcs8_encrypted_pem(&mut rand::thread_rng(), password.as_bytes(), LineEnding::LF),
            None => self.key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| SecurityError::CertificateBuild(format!("failed to encode CA key: {e}")))?;

        std::fs::write(cert_path, encode_certificate_pem(std::slice::from_ref(&self.certificate_der)))?;
        std::fs::write(key_path, key_pem.as_bytes())?;
        debug!("Wrote certificate authority {} to {}", self.subject(), cert_path.display());
        Ok(())
    }

    /// Issue a certificate with a freshly generated key
    pub fn issue(&self, user_dn: &str, options: &IssueOptions) -> Result<Credential> {
        let key = generate_key(options.key_size)?;
        let start = SystemTime::now() - options.backdate;
        self.issue_for_key(user_dn, key, start, start + options.lifetime, options.algorithm)
    }

    /// Issue a certificate for an existing key and validity window
    pub fn issue_for_key(
        &self,
        user_dn: &str,
        key: RsaPrivateKey,
        not_before: SystemTime,
        not_after: SystemTime,
        algorithm: SignatureAlgorithm,
    ) -> Result<Credential> {
        let subject = parse_dn(user_dn)?;
        let spki = spki_of(&key.to_public_key())?;
        let certificate = self.sign_public_key(subject, spki, not_before, not_after, algorithm)?;

        self.verify(&certificate, SystemTime::now())?;

        let der = certificate
            .to_der()
            .map_err(|e| SecurityError::CertificateBuild(e.to_string()))?;
        let credential = Credential::from_der_chain(vec![der, self.certificate_der.to_vec()], key)?;
        debug!(
            "Issued certificate for {} ({}), valid until {:?}",
            credential.subject(),
            credential.fingerprint(),
            credential.not_after()
        );
        Ok(credential)
    }

    /// Sign a certificate for `subject` over the given public key
    pub fn sign_public_key(
        &self,
        subject: Name,
        spki: SubjectPublicKeyInfoOwned,
        not_before: SystemTime,
        not_after: SystemTime,
        algorithm: SignatureAlgorithm,
    ) -> Result<Certificate> {
        let validity = validity(not_before, not_after)?;
        let profile = Profile::Leaf {
            issuer: self.certificate.tbs_certificate.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: true,
        };
        match algorithm {
            SignatureAlgorithm::Sha1WithRsa => {
                build_signed::<Sha1>(&self.key, profile, validity, subject, spki)
            }
            SignatureAlgorithm::Sha256WithRsa => {
                build_signed::<Sha256>(&self.key, profile, validity, subject, spki)
            }
        }
    }

    /// Check that `certificate` was signed by this CA and is inside its validity window at `now`
    pub fn verify(&self, certificate: &Certificate, now: SystemTime) -> Result<()> {
        let tbs = certificate
            .tbs_certificate
            .to_der()
            .map_err(|e| SecurityError::CertificateBuild(e.to_string()))?;
        let signature = Signature::try_from(certificate.signature.raw_bytes())
            .map_err(|e| SecurityError::CertificateBuild(format!("malformed signature: {e}")))?;

        let oid = certificate.signature_algorithm.oid;
        let verified = if oid == SHA1_WITH_RSA {
            VerifyingKey::<Sha1>::new(self.public_key.clone()).verify(&tbs, &signature)
        } else if oid == SHA256_WITH_RSA {
            VerifyingKey::<Sha256>::new(self.public_key.clone()).verify(&tbs, &signature)
        } else {
            return Err(SecurityError::CertificateBuild(format!(
                "unsupported signature algorithm {oid}"
            )));
        };
        verified.map_err(|e| SecurityError::CertificateBuild(format!("signature verification failed: {e}")))?;

        let validity = &certificate.tbs_certificate.validity;
        if now < to_system_time(&validity.not_before) || now > to_system_time(&validity.not_after) {
            return Err(SecurityError::CertificateBuild(
                "certificate is outside its validity window".into(),
            ));
        }
        Ok(())
    }
}

fn build_signed<D>(
    key: &RsaPrivateKey,
    profile: Profile,
    validity: Validity,
    subject: Name,
    spki: SubjectPublicKeyInfoOwned,
) -> Result<Certificate>
where
    D: Digest + RsaSignatureAssociatedOid + AssociatedOid,
{
    let signer = SigningKey::<D>::new(key.clone());
    CertificateBuilder::new(profile, random_serial(), validity, subject, spki, &signer)
        .and_then(|builder| builder.build::<Signature>())
        .map_err(|e| SecurityError::CertificateBuild(format!("failed to sign certificate: {e}")))
}

pub(crate) fn generate_key(bits: usize) -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| SecurityError::CertificateBuild(format!("key generation failed: {e}")))
}

pub(crate) fn spki_of(public_key: &RsaPublicKey) -> Result<SubjectPublicKeyInfoOwned> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| SecurityError::CertificateBuild(e.to_string()))?;
    SubjectPublicKeyInfoOwned::from_der(der.as_bytes())
        .map_err(|e| SecurityError::CertificateBuild(e.to_string()))
}

pub(crate) fn public_key_of(certificate: &Certificate) -> std::result::Result<RsaPublicKey, String> {
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| e.to_string())?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| e.to_string())
}

fn random_serial() -> SerialNumber {
    SerialNumber::from(rand::thread_rng().gen_range(1u32..(1 << SERIAL_BITS)))
}

fn validity(not_before: SystemTime, not_after: SystemTime) -> Result<Validity> {
    Ok(Validity {
        not_before: utc_time(not_before)?,
        not_after: utc_time(not_after)?,
    })
}

fn utc_time(time: SystemTime) -> Result<Time> {
    let since_epoch = time
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SecurityError::CertificateBuild(e.to_string()))?;
    UtcTime::from_unix_duration(Duration::from_secs(since_epoch.as_secs()))
        .map(Time::UtcTime)
        .map_err(|e| SecurityError::CertificateBuild(format!("unrepresentable time: {e}")))
}

/// Parse a distinguished name such as `CN=alice, O=Gateway, C=DE`.
///
/// Whitespace around the separating commas is ignored.
pub fn parse_dn(dn: &str) -> Result<Name> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in dn.chars() {
        match c {
            ',' if !escaped => parts.push(std::mem::take(&mut current)),
            '\\' if !escaped => {
                escaped = true;
                current.push(c);
                continue;
            }
            _ => current.push(c),
        }
        escaped = false;
    }
    parts.push(current);

    let normalized = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    Name::from_str(&normalized)
        .map_err(|e| SecurityError::CertificateBuild(format!("invalid distinguished name '{dn}': {e}")))
}

/// Subject used for an auto-generated certificate.
///
/// Surrounding quotes are stripped; an empty DN or the literal `admin` falls
/// back to `fallback`.
pub fn normalize_user_dn(user_dn: Option<&str>, fallback: &str) -> String {
    let dn = user_dn
        .unwrap_or_default()
        .trim()
        .trim_matches('"')
        .trim();
    if dn.is_empty() || dn == "admin" {
        fallback.to_string()
    } else {
        dn.to_string()
    }
}

/// PEM encode a certificate chain
pub fn encode_certificate_pem(chain: &[CertificateDer<'_>]) -> String {
    chain
        .iter()
        .filter_map(|cert| x509_cert::der::pem::encode_string("CERTIFICATE", LineEnding::LF, cert.as_ref()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ca() -> CertificateAuthority {
        CertificateAuthority::self_signed("CN=Test CA, O=Unigrid", 1024, Duration::from_secs(86400)).unwrap()
    }

    #[test]
    fn test_issue_short_lived_certificate() {
        let ca = test_ca();
        let options = IssueOptions {
            key_size: 1024,
            ..IssueOptions::default()
        };
        let credential = ca.issue("CN=zdv575, O=Unigrid Gateway, C=DE", &options).unwrap();

        let now = SystemTime::now();
        let lifetime = credential.not_after().duration_since(credential.not_before()).unwrap();
        assert_eq!(lifetime, Duration::from_secs(30 * 3600));
        assert!(credential.not_before() <= now - Duration::from_secs(14 * 60));
        assert!(credential.subject().contains("CN=zdv575"));
        assert_eq!(credential.certificate_chain()[1], *ca.certificate_der());

        let leaf = Certificate::from_der(credential.certificate_chain()[0].as_ref()).unwrap();
        assert_eq!(leaf.signature_algorithm.oid, SHA1_WITH_RSA);
        assert!(ca.verify(&leaf, now).is_ok());
    }

    #[test]
    fn test_sha256_is_configurable() {
        let ca = test_ca();
        let options = IssueOptions {
            key_size: 1024,
            algorithm: SignatureAlgorithm::Sha256WithRsa,
            ..IssueOptions::default()
        };
        let credential = ca.issue("CN=carol", &options).unwrap();
        let leaf = Certificate::from_der(credential.certificate_chain()[0].as_ref()).unwrap();
        assert_eq!(leaf.signature_algorithm.oid, SHA256_WITH_RSA);
    }

    #[test]
    fn test_foreign_ca_fails_verification() {
        let ca = test_ca();
        let other = test_ca();
        let credential = ca
            .issue("CN=dave", &IssueOptions { key_size: 1024, ..IssueOptions::default() })
            .unwrap();
        let leaf = Certificate::from_der(credential.certificate_chain()[0].as_ref()).unwrap();
        assert!(matches!(
            other.verify(&leaf, SystemTime::now()),
            Err(SecurityError::CertificateBuild(_))
        ));
        assert!(ca.verify(&leaf, SystemTime::now() + Duration::from_secs(31 * 3600)).is_err());
    }

    #[test]
    fn test_load_requires_paths() {
        assert!(matches!(
            CertificateAuthority::load(None, Some(Path::new("/tmp/key.pem")), None),
            Err(SecurityError::Configuration(_))
        ));
        assert!(matches!(
            CertificateAuthority::load(Some(Path::new("")), Some(Path::new("/tmp/key.pem")), None),
            Err(SecurityError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_encrypted_key_from_files() {
        let ca = test_ca();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cacert.pem");
        let key_path = dir.path().join("cakey.pem");
        ca.write_pem(&cert_path, &key_path, Some("changeit")).unwrap();
        assert!(std::fs::read_to_string(&key_path).unwrap().contains("ENCRYPTED PRIVATE KEY"));

        let loaded = CertificateAuthority::load(Some(&cert_path), Some(&key_path), Some("changeit")).unwrap();
        assert_eq!(loaded.subject(), ca.subject());
        assert!(CertificateAuthority::load(Some(&cert_path), Some(&key_path), Some("nope")).is_err());
    }

    #[test]
    fn test_normalize_user_dn() {
        let fallback = "CN=fallback";
        assert_eq!(normalize_user_dn(None, fallback), fallback);
        assert_eq!(normalize_user_dn(Some(""), fallback), fallback);
        assert_eq!(normalize_user_dn(Some("admin"), fallback), fallback);
        assert_eq!(normalize_user_dn(Some("\"CN=eve, O=Lab\""), fallback), "CN=eve, O=Lab");
    }

    #[test]
    fn test_parse_dn_tolerates_spaces() {
        let name = parse_dn("CN=zdv575, O=Unigrid Gateway, C=DE").unwrap();
        let rendered = name.to_string();
        assert!(rendered.contains("CN=zdv575"));
        assert!(rendered.contains("O=Unigrid Gateway"));
        assert!(parse_dn("not a dn").is_err());
    }
}
