//! Key types, key document format and crypto capabilities.
//!
//! - `types` - Certificate, DocumentKey, ContentKey
//! - `document` - KeyDocument JSON wire format and signature binding
//! - `crypto` - signing, key wrapping and fingerprints

pub mod crypto;
pub mod document;
pub mod types;

pub use document::*;
pub use types::*;
