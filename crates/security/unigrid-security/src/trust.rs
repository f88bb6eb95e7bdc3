use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::error::{Result, SecurityError};

/// Set of trusted CA certificates.
///
/// Built once and handed explicitly to every security context and to the
/// MyProxy client. Cloning is cheap; the root store is shared.
#[derive(Clone, Debug)]
pub struct TrustValidator {
    roots: Arc<RootCertStore>,
}

impl TrustValidator {
    /// A validator that trusts nothing
    pub fn empty() -> Self {
        Self {
            roots: Arc::new(RootCertStore::empty()),
        }
    }

    /// Load every `*.0` and `*.pem` file in `dir`.
    ///
    /// Unreadable or unparsable files are skipped with a warning.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SecurityError::Configuration(format!("cannot read trust root directory {}: {e}", dir.display()))
        })?;

        let mut store = RootCertStore::empty();
        for entry in entries {
            let path = entry?.path();
            let is_trust_file = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "0" || ext == "pem")
                .unwrap_or(false);
            if !is_trust_file {
                continue;
            }

            let pem = match std::fs::read(&path) {
                Ok(pem) => pem,
                Err(e) => {
                    warn!("Skipping trust root {}: {}", path.display(), e);
                    continue;
                }
            };
            match add_pem(&mut store, &pem) {
                Ok(added) => debug!("Loaded {} trust root(s) from {}", added, path.display()),
                Err(e) => warn!("Skipping trust root {}: {}", path.display(), e),
            }
        }

        if store.is_empty() {
            warn!("No trust roots found in {}", dir.display());
        }
        Ok(Self { roots: Arc::new(store) })
    }

    /// Build a validator from PEM encoded certificates
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut store = RootCertStore::empty();
        add_pem(&mut store, pem)?;
        Ok(Self { roots: Arc::new(store) })
    }

    /// Build a validator from DER encoded certificates
    pub fn from_der(certificates: impl IntoIterator<Item = CertificateDer<'static>>) -> Result<Self> {
        let mut store = RootCertStore::empty();
        for cert in certificates {
            store
                .add(cert)
                .map_err(|e| SecurityError::Configuration(format!("failed to add trust root: {e}")))?;
        }
        Ok(Self { roots: Arc::new(store) })
    }

    pub fn root_store(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn add_pem(store: &mut RootCertStore, pem: &[u8]) -> Result<usize> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SecurityError::Configuration(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(SecurityError::Configuration("no certificates found".into()));
    }
    let count = certs.len();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| SecurityError::Configuration(format!("failed to add trust root: {e}")))?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{encode_certificate_pem, CertificateAuthority};
    use std::time::Duration;

    #[test]
    fn test_loads_hashed_and_pem_files_only() {
        let ca = CertificateAuthority::self_signed("CN=Trust CA", 1024, Duration::from_secs(3600)).unwrap();
        let pem = encode_certificate_pem(&[ca.certificate_der().clone()]);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a1b2c3d4.0"), &pem).unwrap();
        std::fs::write(dir.path().join("extra.pem"), &pem).unwrap();
        std::fs::write(dir.path().join("ignored.crt"), &pem).unwrap();
        std::fs::write(dir.path().join("broken.pem"), "not a certificate").unwrap();

        let validator = TrustValidator::from_directory(dir.path()).unwrap();
        assert_eq!(validator.len(), 2);
    }

    #[test]
    fn test_missing_directory_is_configuration_error() {
        assert!(matches!(
            TrustValidator::from_directory(Path::new("/nonexistent/trust")),
            Err(SecurityError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_pem_rejects_empty_input() {
        assert!(TrustValidator::from_pem(b"").is_err());
        assert!(TrustValidator::empty().is_empty());
    }
}
