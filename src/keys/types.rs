//! Value types passed between pipeline stages.
//!
//! Key material never appears in `Debug` output; only fingerprints do.

use std::fmt;

use crate::keys::crypto::fingerprint;

/// Credential material identifying a pipeline to its provider's key server.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    namespace: String,
    location: String,
    material: Vec<u8>,
}

impl Certificate {
    pub fn new(namespace: &str, location: &str, material: Vec<u8>) -> Self {
        Self {
            namespace: namespace.to_string(),
            location: location.to_string(),
            material,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Hex SHA-256 of the certificate material.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.material)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("namespace", &self.namespace)
            .field("location", &self.location)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Intermediate key wrapped inside a key document.
///
/// Absent for providers that deliver the content key in clear.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct DocumentKey(Option<Vec<u8>>);

impl DocumentKey {
    pub fn absent() -> Self {
        Self(None)
    }

    pub fn present(bytes: Vec<u8>) -> Self {
        Self(Some(bytes))
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }

    /// Fingerprint for diagnostics, `None` when absent.
    pub fn fingerprint(&self) -> Option<String> {
        self.0.as_deref().map(fingerprint)
    }
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fingerprint() {
            Some(fp) => write!(f, "DocumentKey(fingerprint={})", fp),
            None => write!(f, "DocumentKey(absent)"),
        }
    }
}

/// Cleartext content key handed to downstream consumers.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey {
    kid: String,
    value: Vec<u8>,
}

impl ContentKey {
    pub fn new(kid: &str, value: Vec<u8>) -> Self {
        Self {
            kid: kid.to_string(),
            value,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.value)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey")
            .field("kid", &self.kid)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
