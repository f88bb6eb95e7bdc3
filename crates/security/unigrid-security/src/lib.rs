#![deny(unsafe_code)]
//! Credential acquisition for grid job submission.
//!
//! A [`X509SecurityContext`] hands out X.509 credentials for one process. It
//! asks the tenant's credential store first and otherwise falls back to the
//! issuer picked by the identity policy: a MyProxy logon or a short-lived
//! certificate from a local CA.

pub mod ca;
pub mod context;
pub mod credential;
pub mod error;
pub mod issuer;
pub mod myproxy;
pub mod store;
pub mod trust;

pub use ca::{normalize_user_dn, CertificateAuthority, IssueOptions};
pub use context::{ClientConfiguration, OutHandler, SecurityContext, X509SecurityContext};
pub use credential::Credential;
pub use error::{Result, SecurityError, StoreError};
pub use issuer::{issuer_for_policy, CredentialIssuer, MyProxyIssuer, ShortLivedIssuer};
pub use myproxy::{LogonResult, MyProxyClient, TrustRoot};
pub use store::{CredentialStoreGateway, MemoryCredentialStore, StoredCredential};
pub use trust::TrustValidator;
