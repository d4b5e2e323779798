//! Key server boundary.
//!
//! `KeyServerTransport` is the only seam the pipeline sees. The simulated
//! server issues signed key documents for registered endpoints and enforces
//! the two authentication styles providers use: a signed POST body, or a
//! GET bound to the client certificate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::keys::crypto;
use crate::keys::{Certificate, ContentKeyRecord, DeliveryKey, KeyDocument, KeyValue};
use crate::logging::LogContext;
use crate::{log_error, log_warn};

pub const SIGNATURE_HEADER: &str = "X-Cpix-Signature";
pub const CONTENT_ID_HEADER: &str = "X-Content-Id";
/// Correlates server-side log lines with the pipeline run that sent the request.
pub const RUN_ID_HEADER: &str = "X-Cpix-Run-Id";

pub const STATUS_OK: u16 = 200;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Authenticated request built from a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Fingerprint of the client certificate the connection is bound to.
    pub client_certificate: Option<String>,
}

impl KeyRequest {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            client_certificate: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Failures below the HTTP status level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Connect(String),
}

#[async_trait]
pub trait KeyServerTransport: Send + Sync {
    async fn send(&self, request: KeyRequest) -> Result<KeyResponse, TransportError>;
}

/// How an endpoint delivers the content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Content key in clear, no document key.
    Clear,
    /// Content key wrapped under `document_key`, which is wrapped under the
    /// certificate.
    Wrapped { document_key: Vec<u8> },
}

/// One registered key server endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub certificate: Certificate,
    pub kid: String,
    pub content_key: Vec<u8>,
    pub delivery: Delivery,
    /// Answer every request with this status instead of a document.
    pub status_override: Option<u16>,
    /// Simulated network latency.
    pub latency: Option<Duration>,
    /// Sign with a different certificate than the one registered.
    pub foreign_signer: Option<Certificate>,
    /// Bind the delivery key to a different fingerprint.
    pub delivery_fingerprint_override: Option<String>,
}

impl Endpoint {
    pub fn new(certificate: Certificate, kid: &str, content_key: &[u8], delivery: Delivery) -> Self {
        Self {
            certificate,
            kid: kid.to_string(),
            content_key: content_key.to_vec(),
            delivery,
            status_override: None,
            latency: None,
            foreign_signer: None,
            delivery_fingerprint_override: None,
        }
    }
}

/// In-process key server.
#[derive(Debug, Default)]
pub struct SimulatedKeyServer {
    endpoints: RwLock<HashMap<String, Endpoint>>,
    requests: AtomicUsize,
}

impl SimulatedKeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: &str, endpoint: Endpoint) {
        self.endpoints.write().insert(url.to_string(), endpoint);
    }

    /// Modify a registered endpoint in place.
    pub fn configure<F>(&self, url: &str, f: F)
    where
        F: FnOnce(&mut Endpoint),
    {
        if let Some(endpoint) = self.endpoints.write().get_mut(url) {
            f(endpoint);
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn authenticate(endpoint: &Endpoint, request: &KeyRequest) -> bool {
        match request.method {
            Method::Post => request
                .header(SIGNATURE_HEADER)
                .map(|sig| crypto::verify(endpoint.certificate.material(), &request.body, sig))
                .unwrap_or(false),
            Method::Get => {
                request.client_certificate.as_deref()
                    == Some(endpoint.certificate.fingerprint().as_str())
            }
        }
    }

    fn issue(endpoint: &Endpoint, content_id: &str) -> Result<KeyDocument, crypto::CryptoError> {
        let mut doc = KeyDocument::new(&Uuid::new_v4().to_string(), content_id);

        let value = match &endpoint.delivery {
            Delivery::Clear => KeyValue::Clear(crypto::encode(&endpoint.content_key)),
            Delivery::Wrapped { document_key } => {
                let fingerprint = endpoint
                    .delivery_fingerprint_override
                    .clone()
                    .unwrap_or_else(|| endpoint.certificate.fingerprint());
                doc.delivery_key = Some(DeliveryKey { fingerprint });
                doc.document_key = Some(crypto::wrap(
                    endpoint.certificate.material(),
                    document_key,
                )?);
                KeyValue::Wrapped(crypto::wrap(document_key, &endpoint.content_key)?)
            }
        };
        doc.content_keys.push(ContentKeyRecord {
            kid: endpoint.kid.clone(),
            value,
        });

        let signer = endpoint
            .foreign_signer
            .as_ref()
            .unwrap_or(&endpoint.certificate);
        doc.sign(signer);
        Ok(doc)
    }
}

#[async_trait]
impl KeyServerTransport for SimulatedKeyServer {
    async fn send(&self, request: KeyRequest) -> Result<KeyResponse, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let endpoint = self
            .endpoints
            .read()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| TransportError::Connect(request.url.clone()))?;

        if let Some(latency) = endpoint.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(status) = endpoint.status_override {
            return Ok(KeyResponse {
                status,
                body: Vec::new(),
            });
        }

        let ctx = LogContext::new(
            request.header(RUN_ID_HEADER).unwrap_or("unknown"),
            endpoint.certificate.namespace(),
        );

        if !Self::authenticate(&endpoint, &request) {
            log_warn!(ctx, "KEY_SERVER_AUTH_REJECTED", url = request.url);
            return Ok(KeyResponse {
                status: STATUS_UNAUTHORIZED,
                body: Vec::new(),
            });
        }

        let content_id = request.header(CONTENT_ID_HEADER).unwrap_or("unknown");
        match Self::issue(&endpoint, content_id) {
            Ok(doc) => Ok(KeyResponse {
                status: STATUS_OK,
                body: doc.to_bytes(),
            }),
            Err(e) => {
                log_error!(ctx, "KEY_SERVER_ISSUE_FAILED", url = request.url, error = e);
                Ok(KeyResponse {
                    status: STATUS_INTERNAL_ERROR,
                    body: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://sky.test";

    fn server() -> (SimulatedKeyServer, Certificate) {
        let cert = Certificate::new("Sky", "loc", b"Sky-Cert".to_vec());
        let server = SimulatedKeyServer::new();
        server.register(
            URL,
            Endpoint::new(cert.clone(), "kid-1", b"Sky-Content-Key", Delivery::Clear),
        );
        (server, cert)
    }

    #[tokio::test]
    async fn test_bound_get_receives_signed_document() {
        let (server, cert) = server();
        let mut request = KeyRequest::new(Method::Get, URL).with_header(CONTENT_ID_HEADER, "urn:c");
        request.client_certificate = Some(cert.fingerprint());

        let response = server.send(request).await.unwrap();
        assert_eq!(response.status, STATUS_OK);

        let doc = KeyDocument::parse(&response.body).unwrap();
        assert!(doc.verify(&cert));
        assert_eq!(doc.content_id, "urn:c");
    }

    #[tokio::test]
    async fn test_unbound_get_is_unauthorized() {
        let (server, _) = server();
        let response = server.send(KeyRequest::new(Method::Get, URL)).await.unwrap();
        assert_eq!(response.status, STATUS_UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_url_is_transport_error() {
        let (server, _) = server();
        let result = server
            .send(KeyRequest::new(Method::Get, "https://nowhere.test"))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(server.requests(), 1);
    }
}
