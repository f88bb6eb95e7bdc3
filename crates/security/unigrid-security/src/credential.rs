use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};
use x509_cert::der::Decode;
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::error::{Result, SecurityError};

/// An X.509 credential: certificate chain (leaf first) plus the leaf's private key.
///
/// Credentials are replaced wholesale when renewed and are never persisted.
#[derive(Clone)]
pub struct Credential {
    chain: Vec<CertificateDer<'static>>,
    key: RsaPrivateKey,
    subject: String,
    not_before: SystemTime,
    not_after: SystemTime,
}

impl Credential {
    /// Build a credential from DER encoded certificates, leaf first
    pub fn from_der_chain(chain: Vec<Vec<u8>>, key: RsaPrivateKey) -> Result<Self> {
        let leaf_der = chain
            .first()
            .ok_or_else(|| SecurityError::Credential("empty certificate chain".into()))?;
        let leaf = Certificate::from_der(leaf_der)
            .map_err(|e| SecurityError::Credential(format!("invalid leaf certificate: {e}")))?;
        let validity = &leaf.tbs_certificate.validity;

        Ok(Self {
            subject: leaf.tbs_certificate.subject.to_string(),
            not_before: to_system_time(&validity.not_before),
            not_after: to_system_time(&validity.not_after),
            chain: chain.into_iter().map(CertificateDer::from).collect(),
            key,
        })
    }

    /// Parse a PEM certificate chain and a PEM private key.
    ///
    /// The key may be PKCS#1, PKCS#8 or, when a password is given, encrypted PKCS#8.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str, password: Option<&str>) -> Result<Self> {
        let chain = CertificateDer::pem_slice_iter(certificate_pem.as_bytes())
            .map(|cert| cert.map(|c| c.to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SecurityError::Credential(format!("failed to parse certificates: {e}")))?;
        let key = decode_private_key(private_key_pem, password)?;
        Self::from_der_chain(chain, key)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }

    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// Time left until `not_after`, zero once expired
    pub fn remaining_validity(&self, now: SystemTime) -> Duration {
        self.not_after.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// Whether the credential is inside its validity window at `now` and
    /// stays valid for at least `margin` longer.
    pub fn is_valid_at(&self, now: SystemTime, margin: Duration) -> bool {
        if now < self.not_before {
            return false;
        }
        match now.checked_add(margin) {
            Some(deadline) => deadline < self.not_after,
            None => false,
        }
    }

    /// Certificate chain, leaf first
    pub fn certificate_chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// Private key in the form rustls expects
    pub fn private_key_der(&self) -> Result<PrivateKeyDer<'static>> {
        let document = self
            .key
            .to_pkcs8_der()
            .map_err(|e| SecurityError::Credential(format!("failed to encode private key: {e}")))?;
        Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            document.as_bytes().to_vec(),
        )))
    }

    /// SHA-256 fingerprint of the leaf certificate, hex encoded
    pub fn fingerprint(&self) -> String {
        self.chain
            .first()
            .map(|leaf| hex::encode(Sha256::digest(leaf.as_ref())))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("fingerprint", &self.fingerprint())
            .field("chain_len", &self.chain.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

pub(crate) fn to_system_time(time: &Time) -> SystemTime {
    UNIX_EPOCH + time.to_unix_duration()
}

/// Decode an RSA private key from PEM
pub fn decode_private_key(pem: &str, password: Option<&str>) -> Result<RsaPrivateKey> {
    let invalid = |e: String| SecurityError::Credential(format!("failed to parse private key: {e}"));
    if pem.contains("ENCRYPTED PRIVATE KEY") {
        let password = password.ok_or_else(|| {
            SecurityError::Configuration("encrypted private key requires a password".into())
        })?;
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password.as_bytes())
            .map_err(|e| invalid(e.to_string()));
    }
    if pem.contains("RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| invalid(e.to_string()));
    }
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use rsa::pkcs8::LineEnding;
    use unigrid_config::SignatureAlgorithm;

    fn test_ca() -> CertificateAuthority {
        CertificateAuthority::self_signed("CN=Test CA,O=Unigrid", 1024, Duration::from_secs(86400)).unwrap()
    }

    #[test]
    fn test_validity_window_and_margin() {
        let ca = test_ca();
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let now = SystemTime::now();
        let credential = ca
            .issue_for_key(
                "CN=alice",
                key,
                now - Duration::from_secs(60),
                now + Duration::from_secs(30),
                SignatureAlgorithm::Sha1WithRsa,
            )
            .unwrap();

        assert!(credential.is_valid_at(now, Duration::ZERO));
        assert!(!credential.is_valid_at(now, Duration::from_secs(60)));
        assert!(!credential.is_valid_at(now + Duration::from_secs(3600), Duration::ZERO));
        assert!(credential.remaining_validity(now) <= Duration::from_secs(30));
        assert_eq!(credential.certificate_chain().len(), 2);
        assert!(credential.subject().contains("CN=alice"));
        assert_eq!(credential.fingerprint().len(), 64);
    }

    #[test]
    fn test_pem_round_trip_through_store_format() {
        let ca = test_ca();
        let credential = ca
            .issue_for_key(
                "CN=bob",
                RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap(),
                SystemTime::now() - Duration::from_secs(60),
                SystemTime::now() + Duration::from_secs(3600),
                SignatureAlgorithm::Sha256WithRsa,
            )
            .unwrap();

        let cert_pem = crate::ca::encode_certificate_pem(credential.certificate_chain());
        let key_pem = credential.private_key().to_pkcs8_pem(LineEnding::LF).unwrap();

        let parsed = Credential::from_pem(&cert_pem, &key_pem, None).unwrap();
        assert_eq!(parsed.fingerprint(), credential.fingerprint());
        assert_eq!(parsed.certificate_chain().len(), 2);
        assert!(parsed.private_key_der().is_ok());
    }

    #[test]
    fn test_encrypted_key_needs_password() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = key
            .to_pkcs8_encrypted_pem(&mut rand::thread_rng(), b"secret", LineEnding::LF)
            .unwrap();

        assert!(matches!(
            decode_private_key(&pem, None),
            Err(SecurityError::Configuration(_))
        ));
        assert!(decode_private_key(&pem, Some("wrong")).is_err());
        assert_eq!(decode_private_key(&pem, Some("secret")).unwrap(), key);
    }

    #[test]
    fn test_empty_chain_rejected() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        assert!(matches!(
            Credential::from_der_chain(Vec::new(), key),
            Err(SecurityError::Credential(_))
        ));
    }
}
