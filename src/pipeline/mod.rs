//! Pipeline orchestration module.
//!
//! - `stages` - the Stage abstraction and the four-stage chain
//! - `runner` - drives one provider's chain to Completed or Failed
//! - `orchestrator` - one concurrent runner per provider, joined at the end

pub mod orchestrator;
pub mod runner;
pub mod stages;

pub use orchestrator::*;
pub use runner::*;
pub use stages::*;
