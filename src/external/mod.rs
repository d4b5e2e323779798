//! External collaborators, described at their interface boundary.
//!
//! - `secret_store` - certificate lookup by namespace + location
//! - `key_server` - provider key server transport
//! - `message_bus` - publish-only downstream bus
//! - `sandbox` - in-process implementations wired together for local runs

pub mod key_server;
pub mod message_bus;
pub mod sandbox;
pub mod secret_store;

pub use key_server::*;
pub use message_bus::*;
pub use sandbox::*;
pub use secret_store::*;
