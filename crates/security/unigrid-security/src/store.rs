use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Credential kinds a credential store may hold
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoredCredential {
    /// X.509 certificate chain and private key, both PEM encoded
    Certificate {
        certificate_pem: String,
        private_key_pem: String,
        /// Password protecting the private key, if encrypted
        key_password: Option<String>,
    },
    /// SSH key pair
    Ssh { public_key: String, private_key: String },
    /// Username and password
    Password { username: String, password: String },
}

impl StoredCredential {
    pub fn kind(&self) -> &'static str {
        match self {
            StoredCredential::Certificate { .. } => "certificate",
            StoredCredential::Ssh { .. } => "ssh",
            StoredCredential::Password { .. } => "password",
        }
    }
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoredCredential({})", self.kind())
    }
}

/// Read access to the tenant's credential store
#[async_trait]
pub trait CredentialStoreGateway: Send + Sync {
    /// Look up the credential registered under `token_id` for `tenant_id`
    async fn get(&self, tenant_id: &str, token_id: &str) -> Result<Option<StoredCredential>, StoreError>;
}

/// An in-memory credential store
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    /// Map of (tenant_id, token_id) -> credential
    entries: Arc<RwLock<HashMap<(String, String), StoredCredential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant_id: &str, token_id: &str, credential: StoredCredential) {
        let mut entries = self.entries.write().await;
        entries.insert((tenant_id.to_string(), token_id.to_string()), credential);
    }

    pub async fn remove(&self, tenant_id: &str, token_id: &str) -> Option<StoredCredential> {
        let mut entries = self.entries.write().await;
        entries.remove(&(tenant_id.to_string(), token_id.to_string()))
    }
}

#[async_trait]
impl CredentialStoreGateway for MemoryCredentialStore {
    async fn get(&self, tenant_id: &str, token_id: &str) -> Result<Option<StoredCredential>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(tenant_id.to_string(), token_id.to_string())).cloned())
    }
}
