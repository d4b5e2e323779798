//! Sky provider.
//!
//! Requests are GETs bound to the client certificate. Sky documents deliver
//! the content key in clear: there is no delivery key binding and no
//! document key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::{PipelineError, Result};
use crate::external::{KeyRequest, KeyServerTransport, Method, CONTENT_ID_HEADER};
use crate::keys::{crypto, Certificate, ContentKey, DocumentKey, KeyDocument, KeyValue};
use crate::log_debug;
use crate::logging::LogContext;
use crate::providers::common::{exchange, parse_and_verify, BusPublisher, StoreCertificateSource};
use crate::providers::{
    Collaborators, DocumentProcessor, KeyServerClient, Provider, ProviderStages,
};

pub fn build(config: &ProviderConfig, collaborators: &Collaborators) -> ProviderStages {
    let timeout = collaborators.network_timeout;
    ProviderStages {
        provider: Provider::Sky,
        certificate_source: Arc::new(StoreCertificateSource::new(
            config,
            collaborators.secret_store.clone(),
            timeout,
        )),
        client: Arc::new(SkyClient {
            key_server_url: config.key_server_url.clone(),
            content_id: collaborators.content_id.clone(),
            transport: collaborators.key_server.clone(),
            timeout,
        }),
        processor: Arc::new(SkyProcessor),
        publisher: Arc::new(BusPublisher::new(
            config,
            collaborators.bus.clone(),
            timeout,
        )),
    }
}

pub struct SkyClient {
    key_server_url: String,
    content_id: String,
    transport: Arc<dyn KeyServerTransport>,
    timeout: Duration,
}

#[async_trait]
impl KeyServerClient for SkyClient {
    fn create_request(&self, ctx: &LogContext, certificate: &Certificate) -> Result<KeyRequest> {
        let mut request = KeyRequest::new(Method::Get, &self.key_server_url)
            .with_header(CONTENT_ID_HEADER, &self.content_id);
        request.client_certificate = Some(certificate.fingerprint());

        log_debug!(
            ctx,
            "SKY_REQUEST_BUILT",
            url = self.key_server_url,
            method = "GET",
            bound_certificate = certificate.fingerprint()
        );
        Ok(request)
    }

    async fn execute_request_response(
        &self,
        ctx: &LogContext,
        request: KeyRequest,
    ) -> Result<Vec<u8>> {
        exchange(ctx, self.transport.as_ref(), request, self.timeout).await
    }
}

pub struct SkyProcessor;

impl DocumentProcessor for SkyProcessor {
    fn unmarshal(
        &self,
        ctx: &LogContext,
        payload: &[u8],
        certificate: &Certificate,
    ) -> Result<KeyDocument> {
        parse_and_verify(ctx, payload, certificate)
    }

    /// No delivery key in Sky documents.
    fn validate_delivery_key(
        &self,
        _ctx: &LogContext,
        _document: &KeyDocument,
        _certificate: &Certificate,
    ) -> bool {
        true
    }

    /// No document key in Sky documents.
    fn decrypt_document_key(
        &self,
        _document: &KeyDocument,
        _certificate: &Certificate,
    ) -> Result<DocumentKey> {
        Ok(DocumentKey::absent())
    }

    fn decrypt_content_key(
        &self,
        document: &KeyDocument,
        _document_key: &DocumentKey,
    ) -> Result<ContentKey> {
        let record = document
            .primary_key()
            .ok_or_else(|| PipelineError::KeyDecryption("no content key record".to_string()))?;

        match &record.value {
            KeyValue::Clear(encoded) => {
                let value = crypto::decode(encoded)
                    .map_err(|e| PipelineError::KeyDecryption(e.to_string()))?;
                Ok(ContentKey::new(&record.kid, value))
            }
            KeyValue::Wrapped(_) => Err(PipelineError::KeyDecryption(format!(
                "content key {} is wrapped but Sky delivers keys in clear",
                record.kid
            ))),
        }
    }
}
