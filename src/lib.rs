//! cpix-keyflow - staged DRM content-key provisioning
//!
//! For each DRM provider this crate fetches a signing certificate, uses it
//! to authenticate a request to the provider's key server, validates and
//! decrypts the returned key document, and republishes the content key on a
//! downstream topic. The implementation prioritizes:
//!
//! 1. **Security** - a document that fails signature validation never
//!    reaches decryption
//! 2. **Logging** - every stage transition logged with run context
//! 3. **Isolation** - provider runs execute concurrently and fail
//!    independently
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `pipeline` - Stage chain, runner state machine and orchestrator
//! - `providers` - Provider capability traits, registry, Sky and Fire
//! - `keys` - Key types, key document format and crypto capabilities
//! - `external` - Secret store, key server and message bus boundaries
//! - `config` - Provider and runtime configuration
//! - `error` - Error taxonomy and classification
//! - `logging` - Structured logging with run context

pub mod config;
pub mod error;
pub mod external;
pub mod keys;
pub mod logging;
pub mod pipeline;
pub mod providers;

pub use config::{Config, FailurePolicy, ProviderConfig};
pub use error::{ErrorClass, PipelineError, StageFailure};
pub use pipeline::{Orchestrator, RunReport};
pub use providers::{Provider, ProviderRegistry};

/// Initialize the process-wide logger.
///
/// Defaults to Info; `RUST_LOG` overrides. Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}
