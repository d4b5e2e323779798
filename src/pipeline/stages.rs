//! The stage chain.
//!
//! A stage does its work in `handle()` and then, consumed by `next()`,
//! hands its results to the constructor of the following stage. Results
//! travel forward as explicit arguments; nothing is read back from a stage
//! after it has been consumed.
//!
//! Chain: certificate -> key_server -> document -> publish.

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::keys::{Certificate, ContentKey, DocumentKey};
use crate::log_debug;
use crate::logging::LogContext;
use crate::providers::{ProcessedKeys, ProviderStages};

pub const CERTIFICATE_STAGE: &str = "certificate";
pub const KEY_SERVER_STAGE: &str = "key_server";
pub const DOCUMENT_STAGE: &str = "document";
pub const PUBLISH_STAGE: &str = "publish";

/// An atomic, named, single-use unit of pipeline work.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Perform this stage's work. Called at most once; `ctx` identifies the
    /// run and stage in every log line the work emits.
    async fn handle(&mut self, ctx: &LogContext) -> Result<()>;

    /// The following stage, or `None` when the chain ends. A stage whose
    /// `handle()` has not succeeded has nothing to hand forward and also
    /// yields `None`.
    fn next(self: Box<Self>) -> Option<Box<dyn Stage>>;
}

/// First stage of every provider chain.
pub fn initial_stage(stages: ProviderStages) -> Box<dyn Stage> {
    Box::new(CertificateStage::new(stages))
}

pub struct CertificateStage {
    stages: ProviderStages,
    certificate: Option<Certificate>,
}

impl CertificateStage {
    pub fn new(stages: ProviderStages) -> Self {
        Self {
            stages,
            certificate: None,
        }
    }
}

#[async_trait]
impl Stage for CertificateStage {
    fn name(&self) -> &'static str {
        CERTIFICATE_STAGE
    }

    async fn handle(&mut self, ctx: &LogContext) -> Result<()> {
        let certificate = self.stages.certificate_source.fetch_certificate(ctx).await?;
        self.certificate = Some(certificate);
        Ok(())
    }

    fn next(self: Box<Self>) -> Option<Box<dyn Stage>> {
        let stage = *self;
        let certificate = stage.certificate?;
        Some(Box::new(KeyServerStage::new(stage.stages, certificate)))
    }
}

pub struct KeyServerStage {
    stages: ProviderStages,
    certificate: Certificate,
    payload: Option<Vec<u8>>,
}

impl KeyServerStage {
    pub fn new(stages: ProviderStages, certificate: Certificate) -> Self {
        Self {
            stages,
            certificate,
            payload: None,
        }
    }
}

#[async_trait]
impl Stage for KeyServerStage {
    fn name(&self) -> &'static str {
        KEY_SERVER_STAGE
    }

    async fn handle(&mut self, ctx: &LogContext) -> Result<()> {
        let request = self.stages.client.create_request(ctx, &self.certificate)?;
        let payload = self
            .stages
            .client
            .execute_request_response(ctx, request)
            .await?;
        self.payload = Some(payload);
        Ok(())
    }

    fn next(self: Box<Self>) -> Option<Box<dyn Stage>> {
        let stage = *self;
        let payload = stage.payload?;
        Some(Box::new(DocumentStage::new(
            stage.stages,
            stage.certificate,
            payload,
        )))
    }
}

pub struct DocumentStage {
    stages: ProviderStages,
    certificate: Certificate,
    payload: Vec<u8>,
    keys: Option<ProcessedKeys>,
}

impl DocumentStage {
    pub fn new(stages: ProviderStages, certificate: Certificate, payload: Vec<u8>) -> Self {
        Self {
            stages,
            certificate,
            payload,
            keys: None,
        }
    }
}

#[async_trait]
impl Stage for DocumentStage {
    fn name(&self) -> &'static str {
        DOCUMENT_STAGE
    }

    async fn handle(&mut self, ctx: &LogContext) -> Result<()> {
        let keys = self
            .stages
            .processor
            .process(ctx, &self.payload, &self.certificate)?;

        log_debug!(
            ctx,
            "DOCUMENT_PROCESSED",
            kid = keys.content_key.kid(),
            document_key = keys
                .document_key
                .fingerprint()
                .unwrap_or_else(|| "absent".to_string())
        );
        self.keys = Some(keys);
        Ok(())
    }

    fn next(self: Box<Self>) -> Option<Box<dyn Stage>> {
        let stage = *self;
        let keys = stage.keys?;
        Some(Box::new(PublishStage::new(
            stage.stages,
            keys.content_key,
            keys.document_key,
        )))
    }
}

/// Terminal stage.
pub struct PublishStage {
    stages: ProviderStages,
    content_key: ContentKey,
    document_key: DocumentKey,
}

impl PublishStage {
    pub fn new(stages: ProviderStages, content_key: ContentKey, document_key: DocumentKey) -> Self {
        Self {
            stages,
            content_key,
            document_key,
        }
    }
}

#[async_trait]
impl Stage for PublishStage {
    fn name(&self) -> &'static str {
        PUBLISH_STAGE
    }

    async fn handle(&mut self, ctx: &LogContext) -> Result<()> {
        if self.content_key.is_empty() {
            return Err(PipelineError::Publish {
                topic: self.stages.publisher.topic().to_string(),
                cause: "refusing to publish an empty content key".to_string(),
            });
        }
        log_debug!(
            ctx,
            "PUBLISH_START",
            topic = self.stages.publisher.topic(),
            document_key_present = !self.document_key.is_absent()
        );
        self.stages.publisher.publish(ctx, &self.content_key).await
    }

    fn next(self: Box<Self>) -> Option<Box<dyn Stage>> {
        None
    }
}
