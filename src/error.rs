//! Error taxonomy for the key-delivery pipeline.
//!
//! Every error here terminates the pipeline run it occurs in. Stages never
//! retry; the runner wraps the failure with stage context and stops.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::providers::Provider;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Why a key server exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyServerFailure {
    /// The server answered with a non-200 status.
    Status(u16),
    /// The exchange never produced a response.
    Transport(String),
    /// No response within the configured bound.
    Timeout(Duration),
    /// The request could not be built locally.
    Request(String),
}

impl fmt::Display for KeyServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyServerFailure::Status(status) => write!(f, "status {}", status),
            KeyServerFailure::Transport(cause) => write!(f, "transport failure: {}", cause),
            KeyServerFailure::Timeout(after) => write!(f, "timed out after {:?}", after),
            KeyServerFailure::Request(cause) => write!(f, "request not built: {}", cause),
        }
    }
}

/// Errors produced by pipeline stages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The secret store could not produce the provider certificate.
    #[error("Certificate unavailable at {namespace}/{location}: {reason}")]
    CertificateUnavailable {
        namespace: String,
        location: String,
        reason: String,
    },

    /// The key server rejected the request or could not be reached.
    #[error("Key server error: {0}")]
    KeyServer(KeyServerFailure),

    /// The returned payload is not a well-formed key document.
    #[error("Malformed key document: {0}")]
    DocumentFormat(String),

    /// The key document signature does not validate against the certificate.
    #[error("Key document signature invalid: {0}")]
    SignatureInvalid(String),

    /// The provider-specific delivery key check failed.
    #[error("Delivery key invalid: {0}")]
    DeliveryKeyInvalid(String),

    /// A nested key could not be recovered.
    #[error("Key decryption failed: {0}")]
    KeyDecryption(String),

    /// The downstream bus did not accept the content key.
    #[error("Publish to topic {topic} failed: {cause}")]
    Publish { topic: String, cause: String },
}

/// Retry classification of a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Possibly transient; a later run may succeed.
    Transient,
    /// Integrity failure; never retry and raise an alert.
    Security,
    /// Deterministic failure; retrying the same inputs fails again.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Security => "security",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl PipelineError {
    /// Classify this error for alerting and retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::KeyServer(KeyServerFailure::Status(status)) => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            PipelineError::KeyServer(KeyServerFailure::Request(_)) => ErrorClass::Fatal,
            PipelineError::KeyServer(_) | PipelineError::Publish { .. } => ErrorClass::Transient,
            PipelineError::SignatureInvalid(_) | PipelineError::DeliveryKeyInvalid(_) => {
                ErrorClass::Security
            }
            PipelineError::CertificateUnavailable { .. }
            | PipelineError::DocumentFormat(_)
            | PipelineError::KeyDecryption(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_security_relevant(&self) -> bool {
        self.class() == ErrorClass::Security
    }

    /// Short kind name used in log lines and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::CertificateUnavailable { .. } => "CertificateUnavailable",
            PipelineError::KeyServer(_) => "KeyServerError",
            PipelineError::DocumentFormat(_) => "DocumentFormatError",
            PipelineError::SignatureInvalid(_) => "SignatureInvalid",
            PipelineError::DeliveryKeyInvalid(_) => "DeliveryKeyInvalid",
            PipelineError::KeyDecryption(_) => "KeyDecryptionError",
            PipelineError::Publish { .. } => "PublishError",
        }
    }
}

/// A stage error annotated with the provider and stage it came from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{provider}] stage {stage} failed: {source}")]
pub struct StageFailure {
    pub provider: Provider,
    pub stage: &'static str,
    #[source]
    pub source: PipelineError,
}

impl StageFailure {
    pub fn new(provider: Provider, stage: &'static str, source: PipelineError) -> Self {
        Self {
            provider,
            stage,
            source,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn class(&self) -> ErrorClass {
        self.source.class()
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
