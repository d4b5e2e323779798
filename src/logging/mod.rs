//! Structured logging with pipeline run context.
//!
//! Provides logging macros and utilities that include run_id, provider and
//! stage in every log message for easy correlation.

pub mod structured;

pub use structured::*;
