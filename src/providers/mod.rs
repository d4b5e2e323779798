//! DRM providers.
//!
//! Each provider supplies the same four capabilities - certificate source,
//! key server client, document processor, publisher - and the pipeline
//! chains them in a fixed order. Providers are a closed set selected through
//! [`ProviderRegistry`].

pub mod common;
pub mod fire;
pub mod sky;
#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ProviderConfig};
use crate::error::{ConfigError, PipelineError, Result};
use crate::external::{KeyRequest, KeyServerTransport, MessageBus, SecretStore};
use crate::keys::{Certificate, ContentKey, DocumentKey, KeyDocument};
use crate::logging::LogContext;
use crate::pipeline::stages::{initial_stage, Stage};

/// Known DRM provider integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Sky,
    Fire,
}

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[Provider::Sky, Provider::Fire]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Sky => "Sky",
            Provider::Fire => "Fire",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Provider::all()
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownProvider(s.trim().to_string()))
    }
}

/// Produces the provider certificate.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn fetch_certificate(&self, ctx: &LogContext) -> Result<Certificate>;
}

/// Talks to the provider key server.
#[async_trait]
pub trait KeyServerClient: Send + Sync {
    /// Build an authenticated request. Must not alter the certificate.
    fn create_request(&self, ctx: &LogContext, certificate: &Certificate) -> Result<KeyRequest>;

    /// Perform the exchange and return the raw document payload.
    async fn execute_request_response(
        &self,
        ctx: &LogContext,
        request: KeyRequest,
    ) -> Result<Vec<u8>>;
}

/// Keys recovered from one key document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedKeys {
    /// Carried forward for diagnostics only.
    pub document_key: DocumentKey,
    pub content_key: ContentKey,
}

/// Validates and decrypts a provider key document.
pub trait DocumentProcessor: Send + Sync {
    /// Parse the payload and validate its signature against `certificate`.
    fn unmarshal(
        &self,
        ctx: &LogContext,
        payload: &[u8],
        certificate: &Certificate,
    ) -> Result<KeyDocument>;

    fn validate_delivery_key(
        &self,
        ctx: &LogContext,
        document: &KeyDocument,
        certificate: &Certificate,
    ) -> bool;

    /// May return an absent key for providers without an intermediate wrap.
    fn decrypt_document_key(
        &self,
        document: &KeyDocument,
        certificate: &Certificate,
    ) -> Result<DocumentKey>;

    fn decrypt_content_key(
        &self,
        document: &KeyDocument,
        document_key: &DocumentKey,
    ) -> Result<ContentKey>;

    /// Run the four steps in order, stopping at the first failure.
    ///
    /// A document reaches decryption only after `unmarshal` accepted its
    /// signature and the delivery key check passed.
    fn process(
        &self,
        ctx: &LogContext,
        payload: &[u8],
        certificate: &Certificate,
    ) -> Result<ProcessedKeys> {
        let document = self.unmarshal(ctx, payload, certificate)?;

        if !self.validate_delivery_key(ctx, &document, certificate) {
            return Err(PipelineError::DeliveryKeyInvalid(format!(
                "document {} is not bound to certificate {}",
                document.id,
                certificate.fingerprint()
            )));
        }

        let document_key = self.decrypt_document_key(&document, certificate)?;
        let content_key = self.decrypt_content_key(&document, &document_key)?;
        if content_key.is_empty() {
            return Err(PipelineError::KeyDecryption(format!(
                "document {} yielded an empty content key",
                document.id
            )));
        }

        Ok(ProcessedKeys {
            document_key,
            content_key,
        })
    }
}

/// Republishes the content key downstream.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    async fn publish(&self, ctx: &LogContext, key: &ContentKey) -> Result<()>;
}

/// The capability set one provider pipeline is built from.
#[derive(Clone)]
pub struct ProviderStages {
    pub provider: Provider,
    pub certificate_source: Arc<dyn CertificateSource>,
    pub client: Arc<dyn KeyServerClient>,
    pub processor: Arc<dyn DocumentProcessor>,
    pub publisher: Arc<dyn Publisher>,
}

impl fmt::Debug for ProviderStages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStages")
            .field("provider", &self.provider)
            .field("topic", &self.publisher.topic())
            .finish()
    }
}

/// Shared external collaborators handed to provider builders.
#[derive(Clone)]
pub struct Collaborators {
    pub secret_store: Arc<dyn SecretStore>,
    pub key_server: Arc<dyn KeyServerTransport>,
    pub bus: Arc<dyn MessageBus>,
    /// Bound on every network call.
    pub network_timeout: Duration,
    pub content_id: String,
}

impl Collaborators {
    pub fn new(
        secret_store: Arc<dyn SecretStore>,
        key_server: Arc<dyn KeyServerTransport>,
        bus: Arc<dyn MessageBus>,
        config: &Config,
    ) -> Self {
        Self {
            secret_store,
            key_server,
            bus,
            network_timeout: config.network_timeout(),
            content_id: config.content_id.clone(),
        }
    }
}

pub type StageBuilder = fn(&ProviderConfig, &Collaborators) -> ProviderStages;

/// Provider-keyed factory for pipeline capability sets.
#[derive(Clone)]
pub struct ProviderRegistry {
    builders: HashMap<Provider, StageBuilder>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with every built-in provider.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Provider::Sky, sky::build);
        registry.register(Provider::Fire, fire::build);
        registry
    }

    pub fn register(&mut self, provider: Provider, builder: StageBuilder) {
        self.builders.insert(provider, builder);
    }

    pub fn build(
        &self,
        config: &ProviderConfig,
        collaborators: &Collaborators,
    ) -> std::result::Result<ProviderStages, ConfigError> {
        let builder = self
            .builders
            .get(&config.provider)
            .ok_or_else(|| ConfigError::UnknownProvider(config.provider.to_string()))?;
        Ok(builder(config, collaborators))
    }

    /// The first stage of the provider's chain.
    pub fn initial_stage(
        &self,
        config: &ProviderConfig,
        collaborators: &Collaborators,
    ) -> std::result::Result<Box<dyn Stage>, ConfigError> {
        Ok(initial_stage(self.build(config, collaborators)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::Sandbox;

    #[test]
    fn test_provider_parse_is_case_insensitive() {
        assert_eq!("sky".parse::<Provider>().unwrap(), Provider::Sky);
        assert_eq!(" FIRE ".parse::<Provider>().unwrap(), Provider::Fire);
        assert!("ice".parse::<Provider>().is_err());
    }

    #[test]
    fn test_registry_selects_initial_stage() {
        let config = Config::default();
        let sandbox = Sandbox::seeded(&config);
        let collaborators = sandbox.collaborators(&config);
        let registry = ProviderRegistry::builtin();

        for provider in &config.providers {
            let stage = registry.initial_stage(provider, &collaborators).unwrap();
            assert_eq!(stage.name(), "certificate");
        }
    }

    #[test]
    fn test_registry_rejects_unregistered_provider() {
        let config = Config::default();
        let sandbox = Sandbox::seeded(&config);
        let collaborators = sandbox.collaborators(&config);
        let mut registry = ProviderRegistry::empty();
        registry.register(Provider::Sky, sky::build);

        let fire = ProviderConfig::for_provider(Provider::Fire);
        assert!(matches!(
            registry.build(&fire, &collaborators),
            Err(ConfigError::UnknownProvider(_))
        ));
    }
}
