//! Scripted provider capabilities for pipeline tests.
//!
//! Every capability call is recorded so tests can assert on order and on
//! which steps were never reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{KeyServerFailure, PipelineError, Result};
use crate::external::{KeyRequest, Method};
use crate::keys::{Certificate, ContentKey, DocumentKey, KeyDocument};
use crate::logging::LogContext;
use crate::providers::{
    CertificateSource, DocumentProcessor, KeyServerClient, Provider, ProviderStages, Publisher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    FetchCertificate,
    CreateRequest,
    ExecuteRequest,
    Unmarshal,
    ValidateDeliveryKey,
    DecryptDocumentKey,
    DecryptContentKey,
    Publish,
}

#[derive(Debug, Clone, Default)]
struct Script {
    invalid_signature: bool,
    invalid_delivery_key: bool,
    absent_document_key: bool,
    key_server_status: Option<u16>,
    key_server_latency: Option<Duration>,
    certificate_panic: bool,
}

struct Shared {
    provider: Provider,
    script: Script,
    calls: Mutex<Vec<Call>>,
    published: Mutex<Vec<ContentKey>>,
}

impl Shared {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

/// A provider whose every capability succeeds unless scripted otherwise.
#[derive(Clone)]
pub struct ScriptedProvider {
    shared: Arc<Shared>,
}

impl ScriptedProvider {
    pub fn new(provider: Provider) -> Self {
        Self::with_script(provider, Script::default())
    }

    fn with_script(provider: Provider, script: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                script,
                calls: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    fn rescript<F: FnOnce(&mut Script)>(self, f: F) -> Self {
        let mut script = self.shared.script.clone();
        f(&mut script);
        Self::with_script(self.shared.provider, script)
    }

    pub fn with_invalid_signature(self) -> Self {
        self.rescript(|s| s.invalid_signature = true)
    }

    pub fn with_invalid_delivery_key(self) -> Self {
        self.rescript(|s| s.invalid_delivery_key = true)
    }

    pub fn with_absent_document_key(self) -> Self {
        self.rescript(|s| s.absent_document_key = true)
    }

    pub fn with_key_server_status(self, status: u16) -> Self {
        self.rescript(|s| s.key_server_status = Some(status))
    }

    pub fn with_key_server_latency(self, latency: Duration) -> Self {
        self.rescript(|s| s.key_server_latency = Some(latency))
    }

    /// Panic inside the certificate stage, taking the run's task down.
    pub fn with_certificate_panic(self) -> Self {
        self.rescript(|s| s.certificate_panic = true)
    }

    pub fn stages(&self) -> ProviderStages {
        ProviderStages {
            provider: self.shared.provider,
            certificate_source: Arc::new(self.clone()),
            client: Arc::new(self.clone()),
            processor: Arc::new(self.clone()),
            publisher: Arc::new(self.clone()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().clone()
    }

    pub fn published(&self) -> Vec<ContentKey> {
        self.shared.published.lock().clone()
    }

    fn certificate(&self) -> Certificate {
        let name = self.shared.provider.as_str();
        Certificate::new(name, "scripted", format!("{}-Cert", name).into_bytes())
    }
}

#[async_trait]
impl CertificateSource for ScriptedProvider {
    async fn fetch_certificate(&self, _ctx: &LogContext) -> Result<Certificate> {
        self.shared.record(Call::FetchCertificate);
        if self.shared.script.certificate_panic {
            panic!("scripted certificate source crashed");
        }
        Ok(self.certificate())
    }
}

#[async_trait]
impl KeyServerClient for ScriptedProvider {
    fn create_request(&self, _ctx: &LogContext, _certificate: &Certificate) -> Result<KeyRequest> {
        self.shared.record(Call::CreateRequest);
        Ok(KeyRequest::new(Method::Get, "https://scripted.test"))
    }

    async fn execute_request_response(
        &self,
        _ctx: &LogContext,
        _request: KeyRequest,
    ) -> Result<Vec<u8>> {
        self.shared.record(Call::ExecuteRequest);
        if let Some(latency) = self.shared.script.key_server_latency {
            tokio::time::sleep(latency).await;
        }
        match self.shared.script.key_server_status {
            Some(status) => Err(PipelineError::KeyServer(KeyServerFailure::Status(status))),
            None => Ok(b"scripted-document".to_vec()),
        }
    }
}

impl DocumentProcessor for ScriptedProvider {
    fn unmarshal(
        &self,
        _ctx: &LogContext,
        _payload: &[u8],
        _certificate: &Certificate,
    ) -> Result<KeyDocument> {
        self.shared.record(Call::Unmarshal);
        if self.shared.script.invalid_signature {
            return Err(PipelineError::SignatureInvalid("scripted".to_string()));
        }
        Ok(KeyDocument::new("scripted-doc", "urn:scripted"))
    }

    fn validate_delivery_key(
        &self,
        _ctx: &LogContext,
        _document: &KeyDocument,
        _certificate: &Certificate,
    ) -> bool {
        self.shared.record(Call::ValidateDeliveryKey);
        !self.shared.script.invalid_delivery_key
    }

    fn decrypt_document_key(
        &self,
        _document: &KeyDocument,
        _certificate: &Certificate,
    ) -> Result<DocumentKey> {
        self.shared.record(Call::DecryptDocumentKey);
        if self.shared.script.absent_document_key {
            Ok(DocumentKey::absent())
        } else {
            Ok(DocumentKey::present(b"Document-Key".to_vec()))
        }
    }

    fn decrypt_content_key(
        &self,
        _document: &KeyDocument,
        _document_key: &DocumentKey,
    ) -> Result<ContentKey> {
        self.shared.record(Call::DecryptContentKey);
        Ok(ContentKey::new("scripted-kid", b"Content-Key".to_vec()))
    }
}

#[async_trait]
impl Publisher for ScriptedProvider {
    fn topic(&self) -> &str {
        self.shared.provider.as_str()
    }

    async fn publish(&self, _ctx: &LogContext, key: &ContentKey) -> Result<()> {
        self.shared.record(Call::Publish);
        self.shared.published.lock().push(key.clone());
        Ok(())
    }
}
