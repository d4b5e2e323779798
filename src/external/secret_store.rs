//! Secret store boundary.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret not found")]
    NotFound,

    #[error("access denied: {0}")]
    Denied(String),
}

/// Certificate lookup by provider namespace and location.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn lookup(&self, namespace: &str, location: &str) -> Result<Vec<u8>, SecretStoreError>;
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<(String, String), Vec<u8>>>,
    denied: RwLock<HashSet<String>>,
    lookups: AtomicUsize,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, location: &str, material: &[u8]) {
        self.secrets.write().insert(
            (namespace.to_string(), location.to_string()),
            material.to_vec(),
        );
    }

    /// Deny every lookup in `namespace`.
    pub fn deny(&self, namespace: &str) {
        self.denied.write().insert(namespace.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn lookup(&self, namespace: &str, location: &str) -> Result<Vec<u8>, SecretStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.denied.read().contains(namespace) {
            return Err(SecretStoreError::Denied(format!(
                "namespace {} is not readable",
                namespace
            )));
        }

        self.secrets
            .read()
            .get(&(namespace.to_string(), location.to_string()))
            .cloned()
            .ok_or(SecretStoreError::NotFound)
    }
}
