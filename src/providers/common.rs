//! Capabilities shared by every provider.
//!
//! Certificate lookup and publishing differ between providers only in
//! configuration (namespace, location, topic), so both are implemented once
//! here. Network helpers bound each call by the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::{KeyServerFailure, PipelineError, Result};
use crate::external::{
    KeyRequest, KeyServerTransport, MessageBus, SecretStore, RUN_ID_HEADER, STATUS_OK,
};
use crate::keys::{Certificate, ContentKey, KeyDocument};
use crate::logging::LogContext;
use crate::providers::{CertificateSource, Publisher};
use crate::{log_debug, log_error, log_info, log_warn};

/// Reads the provider certificate from the secret store.
pub struct StoreCertificateSource {
    namespace: String,
    location: String,
    store: Arc<dyn SecretStore>,
    timeout: Duration,
}

impl StoreCertificateSource {
    pub fn new(config: &ProviderConfig, store: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self {
            namespace: config.namespace.clone(),
            location: config.certificate_location.clone(),
            store,
            timeout,
        }
    }

    fn unavailable(&self, reason: String) -> PipelineError {
        PipelineError::CertificateUnavailable {
            namespace: self.namespace.clone(),
            location: self.location.clone(),
            reason,
        }
    }
}

#[async_trait]
impl CertificateSource for StoreCertificateSource {
    async fn fetch_certificate(&self, ctx: &LogContext) -> Result<Certificate> {
        log_info!(ctx, "CERTIFICATE_FETCH", namespace = self.namespace);

        let lookup = self.store.lookup(&self.namespace, &self.location);
        let material = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(material)) => material,
            Ok(Err(e)) => return Err(self.unavailable(e.to_string())),
            Err(_) => {
                log_warn!(ctx, "SECRET_STORE_TIMEOUT", after_ms = self.timeout.as_millis());
                return Err(self.unavailable(format!("timed out after {:?}", self.timeout)));
            }
        };

        if material.is_empty() {
            return Err(self.unavailable("secret is empty".to_string()));
        }

        let certificate = Certificate::new(&self.namespace, &self.location, material);
        log_info!(ctx, "CERTIFICATE_FETCHED", fingerprint = certificate.fingerprint());
        Ok(certificate)
    }
}

/// Publishes the content key on the provider's topic.
pub struct BusPublisher {
    topic: String,
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl BusPublisher {
    pub fn new(config: &ProviderConfig, bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self {
            topic: config.topic.clone(),
            bus,
            timeout,
        }
    }

    fn failed(&self, cause: String) -> PipelineError {
        PipelineError::Publish {
            topic: self.topic.clone(),
            cause,
        }
    }
}

#[async_trait]
impl Publisher for BusPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, ctx: &LogContext, key: &ContentKey) -> Result<()> {
        let send = self.bus.publish(&self.topic, key.kid(), key.value());
        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(())) => {
                log_info!(ctx, "KEY_PUBLISHED", topic = self.topic, kid = key.kid());
                Ok(())
            }
            Ok(Err(e)) => Err(self.failed(e.to_string())),
            Err(_) => {
                log_warn!(
                    ctx,
                    "BUS_TIMEOUT",
                    topic = self.topic,
                    after_ms = self.timeout.as_millis()
                );
                Err(self.failed(format!("timed out after {:?}", self.timeout)))
            }
        }
    }
}

/// Send a request and return the body of a 200 response.
///
/// Any other status, a transport failure, or exceeding `timeout` is a
/// key server error.
pub async fn exchange(
    ctx: &LogContext,
    transport: &dyn KeyServerTransport,
    request: KeyRequest,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let url = request.url.clone();
    let request = request.with_header(RUN_ID_HEADER, &ctx.run_id);
    let response = match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            log_warn!(ctx, "KEY_SERVER_TRANSPORT_FAILED", url = url, error = e);
            return Err(PipelineError::KeyServer(KeyServerFailure::Transport(
                e.to_string(),
            )));
        }
        Err(_) => {
            log_warn!(ctx, "KEY_SERVER_TIMEOUT", url = url, after_ms = timeout.as_millis());
            return Err(PipelineError::KeyServer(KeyServerFailure::Timeout(timeout)));
        }
    };

    if response.status != STATUS_OK {
        log_warn!(ctx, "KEY_SERVER_STATUS", url = url, status = response.status);
        return Err(PipelineError::KeyServer(KeyServerFailure::Status(
            response.status,
        )));
    }

    log_debug!(ctx, "KEY_SERVER_OK", url = url, bytes = response.body.len());
    Ok(response.body)
}

/// Parse a key document and reject it unless its signature validates
/// against `certificate`.
pub fn parse_and_verify(
    ctx: &LogContext,
    payload: &[u8],
    certificate: &Certificate,
) -> Result<KeyDocument> {
    let document =
        KeyDocument::parse(payload).map_err(|e| PipelineError::DocumentFormat(e.to_string()))?;

    if !document.verify(certificate) {
        log_error!(
            ctx,
            "SECURITY_ALERT",
            check = "signature",
            document = document.id,
            certificate = certificate.fingerprint()
        );
        return Err(PipelineError::SignatureInvalid(format!(
            "document {} not signed by certificate {}",
            document.id,
            certificate.fingerprint()
        )));
    }

    log_debug!(ctx, "SIGNATURE_VERIFY", document = document.id, valid = true);
    Ok(document)
}
