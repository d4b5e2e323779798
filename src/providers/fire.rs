//! Fire provider.
//!
//! Requests are POSTs whose body is signed with the certificate. Fire
//! documents bind a delivery key to the certificate fingerprint, carry a
//! document key wrapped under the certificate, and a content key wrapped
//! under the document key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::config::ProviderConfig;
use crate::error::{KeyServerFailure, PipelineError, Result};
use crate::external::{
    KeyRequest, KeyServerTransport, Method, CONTENT_ID_HEADER, SIGNATURE_HEADER,
};
use crate::keys::{crypto, Certificate, ContentKey, DocumentKey, KeyDocument, KeyValue};
use crate::logging::LogContext;
use crate::{log_debug, log_error, log_warn};
use crate::providers::common::{exchange, parse_and_verify, BusPublisher, StoreCertificateSource};
use crate::providers::{
    Collaborators, DocumentProcessor, KeyServerClient, Provider, ProviderStages,
};

pub fn build(config: &ProviderConfig, collaborators: &Collaborators) -> ProviderStages {
    let timeout = collaborators.network_timeout;
    ProviderStages {
        provider: Provider::Fire,
        certificate_source: Arc::new(StoreCertificateSource::new(
            config,
            collaborators.secret_store.clone(),
            timeout,
        )),
        client: Arc::new(FireClient {
            key_server_url: config.key_server_url.clone(),
            content_id: collaborators.content_id.clone(),
            transport: collaborators.key_server.clone(),
            timeout,
        }),
        processor: Arc::new(FireProcessor),
        publisher: Arc::new(BusPublisher::new(
            config,
            collaborators.bus.clone(),
            timeout,
        )),
    }
}

#[derive(Serialize)]
struct FireKeyRequest<'a> {
    content_id: &'a str,
    requested_at: String,
}

pub struct FireClient {
    key_server_url: String,
    content_id: String,
    transport: Arc<dyn KeyServerTransport>,
    timeout: Duration,
}

#[async_trait]
impl KeyServerClient for FireClient {
    fn create_request(&self, ctx: &LogContext, certificate: &Certificate) -> Result<KeyRequest> {
        let body = serde_json::to_vec(&FireKeyRequest {
            content_id: &self.content_id,
            requested_at: Utc::now().to_rfc3339(),
        })
        .map_err(|e| PipelineError::KeyServer(KeyServerFailure::Request(e.to_string())))?;

        let signature = crypto::sign(certificate.material(), &body);
        let mut request = KeyRequest::new(Method::Post, &self.key_server_url)
            .with_header(CONTENT_ID_HEADER, &self.content_id)
            .with_header(SIGNATURE_HEADER, &signature);
        request.body = body;

        log_debug!(
            ctx,
            "FIRE_REQUEST_SIGNED",
            url = self.key_server_url,
            method = "POST",
            bytes = request.body.len()
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

pub struct FireProcessor;

impl DocumentProcessor for FireProcessor {
    fn unmarshal(
        &self,
        ctx: &LogContext,
        payload: &[u8],
        certificate: &Certificate,
    ) -> Result<KeyDocument> {
        parse_and_verify(ctx, payload, certificate)
    }

    /// The delivery key must name this pipeline's certificate.
    fn validate_delivery_key(
        &self,
        ctx: &LogContext,
        document: &KeyDocument,
        certificate: &Certificate,
    ) -> bool {
        match &document.delivery_key {
            Some(delivery) => {
                let valid = delivery.fingerprint == certificate.fingerprint();
                if !valid {
                    log_error!(
                        ctx,
                        "SECURITY_ALERT",
                        check = "delivery_key",
                        document = document.id,
                        expected = certificate.fingerprint(),
                        got = delivery.fingerprint
                    );
                }
                valid
            }
            None => {
                log_warn!(ctx, "DELIVERY_KEY_MISSING", document = document.id);
                false
            }
        }
    }

    fn decrypt_document_key(
        &self,
        document: &KeyDocument,
        certificate: &Certificate,
    ) -> Result<DocumentKey> {
        let wrapped = document.document_key.as_ref().ok_or_else(|| {
            PipelineError::KeyDecryption(format!("document {} has no document key", document.id))
        })?;

        let bytes = crypto::unwrap(certificate.material(), wrapped)
            .map_err(|e| PipelineError::KeyDecryption(format!("document key: {}", e)))?;
        Ok(DocumentKey::present(bytes))
    }

    fn decrypt_content_key(
        &self,
        document: &KeyDocument,
        document_key: &DocumentKey,
    ) -> Result<ContentKey> {
        let record = document
            .primary_key()
            .ok_or_else(|| PipelineError::KeyDecryption("no content key record".to_string()))?;
        let kek = document_key.bytes().ok_or_else(|| {
            PipelineError::KeyDecryption("content key requires a document key".to_string())
        })?;

        match &record.value {
            KeyValue::Wrapped(wrapped) => {
                let value = crypto::unwrap(kek, wrapped).map_err(|e| {
                    PipelineError::KeyDecryption(format!("content key {}: {}", record.kid, e))
                })?;
                Ok(ContentKey::new(&record.kid, value))
            }
            KeyValue::Clear(_) => Err(PipelineError::KeyDecryption(format!(
                "content key {} delivered in clear; Fire requires a wrapped key",
                record.kid
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{ContentKeyRecord, DeliveryKey};

    fn ctx() -> LogContext {
        LogContext::new("run-test", "Fire").with_stage("document")
    }

    fn cert() -> Certificate {
        Certificate::new("Fire", "Fire cert location", b"Fire-Cert".to_vec())
    }

    fn wrapped_document(fingerprint: &str) -> Vec<u8> {
        let mut doc = KeyDocument::new("doc-fire", "urn:content:default");
        doc.delivery_key = Some(DeliveryKey {
            fingerprint: fingerprint.to_string(),
        });
        doc.document_key = Some(crypto::wrap(b"Fire-Cert", b"Document-Key").unwrap());
        doc.content_keys.push(ContentKeyRecord {
            kid: "fire-kid".to_string(),
            value: KeyValue::Wrapped(crypto::wrap(b"Document-Key", b"Content-Key").unwrap()),
        });
        doc.sign(&cert());
        doc.to_bytes()
    }

    #[test]
    fn test_document_key_decrypts_to_content_key() {
        let payload = wrapped_document(&cert().fingerprint());

        let keys = FireProcessor.process(&ctx(), &payload, &cert()).unwrap();
        assert_eq!(keys.document_key.bytes(), Some(&b"Document-Key"[..]));
        assert_eq!(keys.content_key.value(), b"Content-Key");
    }

    #[test]
    fn test_foreign_delivery_key_rejected() {
        let payload = wrapped_document("00ff");

        let err = FireProcessor.process(&ctx(), &payload, &cert()).unwrap_err();
        assert_eq!(err.kind(), "DeliveryKeyInvalid");
        assert!(err.is_security_relevant());
    }

    #[test]
    fn test_absent_document_key_cannot_open_content_key() {
        let payload = wrapped_document(&cert().fingerprint());
        let doc = FireProcessor.unmarshal(&ctx(), &payload, &cert()).unwrap();

        let err = FireProcessor
            .decrypt_content_key(&doc, &DocumentKey::absent())
            .unwrap_err();
        assert_eq!(err.kind(), "KeyDecryptionError");
    }

    #[test]
    fn test_signed_post_request() {
        let client = FireClient {
            key_server_url: "https://fire.drmserver.com".to_string(),
            content_id: "urn:c".to_string(),
            transport: Arc::new(crate::external::SimulatedKeyServer::new()),
            timeout: Duration::from_secs(1),
        };
        let certificate = cert();

        let request = client.create_request(&ctx(), &certificate).unwrap();
        let signature = request.header(SIGNATURE_HEADER).unwrap();
        assert_eq!(request.method, Method::Post);
        assert!(crypto::verify(certificate.material(), &request.body, signature));
        assert!(request.client_certificate.is_none());
    }
}
