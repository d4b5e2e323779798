//! Key document wire format.
//!
//! A key document is JSON carrying an optional delivery-key binding, an
//! optional wrapped document key, one or more content key records and an
//! Ed25519 signature over the canonical JSON of everything else.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::crypto::{self, WrappedKey};
use crate::keys::types::Certificate;

/// Key document parse failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("JSON parse error: {0}")]
    Json(String),

    #[error("Document carries no content keys")]
    NoContentKeys,

    #[error("Document signature is empty")]
    MissingSignature,
}

/// Binding between the document and the certificate it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub fingerprint: String,
}

/// How a content key is carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValue {
    /// Base64 cleartext.
    Clear(String),
    /// Sealed under the document key.
    Wrapped(WrappedKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentKeyRecord {
    pub kid: String,
    pub value: KeyValue,
}

/// Parsed key document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDocument {
    pub id: String,
    pub content_id: String,
    #[serde(default)]
    pub delivery_key: Option<DeliveryKey>,
    #[serde(default)]
    pub document_key: Option<WrappedKey>,
    pub content_keys: Vec<ContentKeyRecord>,
    pub signature: String,
}

/// Everything the signature covers, in serialization order.
#[derive(Serialize)]
struct SignedFields<'a> {
    id: &'a str,
    content_id: &'a str,
    delivery_key: &'a Option<DeliveryKey>,
    document_key: &'a Option<WrappedKey>,
    content_keys: &'a [ContentKeyRecord],
}

impl KeyDocument {
    /// Build an unsigned document. Call [`KeyDocument::sign`] before encoding.
    pub fn new(id: &str, content_id: &str) -> Self {
        Self {
            id: id.to_string(),
            content_id: content_id.to_string(),
            delivery_key: None,
            document_key: None,
            content_keys: Vec::new(),
            signature: String::new(),
        }
    }

    /// Parse raw payload bytes. Does not check the signature.
    pub fn parse(payload: &[u8]) -> Result<Self, DocumentError> {
        let doc: KeyDocument =
            serde_json::from_slice(payload).map_err(|e| DocumentError::Json(e.to_string()))?;

        if doc.content_keys.is_empty() {
            return Err(DocumentError::NoContentKeys);
        }
        if doc.signature.is_empty() {
            return Err(DocumentError::MissingSignature);
        }
        Ok(doc)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing plain structs with string keys cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    fn signing_payload(&self) -> Vec<u8> {
        let fields = SignedFields {
            id: &self.id,
            content_id: &self.content_id,
            delivery_key: &self.delivery_key,
            document_key: &self.document_key,
            content_keys: &self.content_keys,
        };
        serde_json::to_vec(&fields).unwrap_or_default()
    }

    pub fn sign(&mut self, certificate: &Certificate) {
        self.signature = crypto::sign(certificate.material(), &self.signing_payload());
    }

    /// Check the signature against the certificate's verifying key.
    pub fn verify(&self, certificate: &Certificate) -> bool {
        crypto::verify(
            certificate.material(),
            &self.signing_payload(),
            &self.signature,
        )
    }

    /// First content key record.
    pub fn primary_key(&self) -> Option<&ContentKeyRecord> {
        self.content_keys.first()
    }
}
