//! In-process collaborators for local runs.
//!
//! Seeds a secret store, key server and bus so that every configured
//! provider can complete a pipeline run without external services.

use std::sync::Arc;

use crate::config::{Config, ProviderConfig};
use crate::external::{
    Delivery, Endpoint, InMemoryBus, InMemorySecretStore, SimulatedKeyServer,
};
use crate::keys::Certificate;
use crate::providers::{Collaborators, Provider};

/// Document key the Fire endpoint wraps its content key under.
pub const FIRE_DOCUMENT_KEY: &[u8] = b"Document-Key";
pub const FIRE_CONTENT_KEY: &[u8] = b"Content-Key";
pub const SKY_CONTENT_KEY: &[u8] = b"Sky-Content-Key";

/// Certificate material seeded for a provider.
pub fn certificate_material(provider: Provider) -> Vec<u8> {
    format!("{}-Cert", provider).into_bytes()
}

pub struct Sandbox {
    pub secret_store: Arc<InMemorySecretStore>,
    pub key_server: Arc<SimulatedKeyServer>,
    pub bus: Arc<InMemoryBus>,
}

impl Sandbox {
    /// Seed certificates and key server endpoints for every configured provider.
    pub fn seeded(config: &Config) -> Self {
        let sandbox = Self {
            secret_store: Arc::new(InMemorySecretStore::new()),
            key_server: Arc::new(SimulatedKeyServer::new()),
            bus: Arc::new(InMemoryBus::new()),
        };
        for provider in &config.providers {
            sandbox.seed(provider);
        }
        sandbox
    }

    fn seed(&self, config: &ProviderConfig) {
        let material = certificate_material(config.provider);
        self.secret_store
            .insert(&config.namespace, &config.certificate_location, &material);

        let certificate = Certificate::new(&config.namespace, &config.certificate_location, material);
        let kid = format!("{}-kid", config.provider.as_str().to_lowercase());
        let endpoint = match config.provider {
            Provider::Sky => Endpoint::new(certificate, &kid, SKY_CONTENT_KEY, Delivery::Clear),
            Provider::Fire => Endpoint::new(
                certificate,
                &kid,
                FIRE_CONTENT_KEY,
                Delivery::Wrapped {
                    document_key: FIRE_DOCUMENT_KEY.to_vec(),
                },
            ),
        };
        self.key_server.register(&config.key_server_url, endpoint);
    }

    pub fn collaborators(&self, config: &Config) -> Collaborators {
        Collaborators::new(
            self.secret_store.clone(),
            self.key_server.clone(),
            self.bus.clone(),
            config,
        )
    }
}
