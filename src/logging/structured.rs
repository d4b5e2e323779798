//! Structured logging utilities.
//!
//! Provides context-aware logging with run_id, provider and stage included
//! in every log message. Orchestration-level lines carry only the run_id.

use std::fmt;

/// Logging context for one provider pipeline run.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub provider: Option<String>,
    pub stage: Option<&'static str>,
}

impl LogContext {
    pub fn new(run_id: &str, provider: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            provider: Some(provider.to_string()),
            stage: None,
        }
    }

    /// Context for lines that span every provider run.
    pub fn batch(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            provider: None,
            stage: None,
        }
    }

    pub fn with_stage(&self, stage: &'static str) -> Self {
        Self {
            run_id: self.run_id.clone(),
            provider: self.provider.clone(),
            stage: Some(stage),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[run={}]", self.run_id)?;
        if let Some(provider) = &self.provider {
            write!(f, " [provider={}]", provider)?;
        }
        if let Some(stage) = self.stage {
            write!(f, " [stage={}]", stage)?;
        }
        Ok(())
    }
}

/// Log an info message with context.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::info!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={} "),*), $($value),*)
        );
    };
}

/// Log a warning message with context.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::warn!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={} "),*), $($value),*)
        );
    };
}

/// Log an error message with context.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::error!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={} "),*), $($value),*)
        );
    };
}

/// Log a debug message with context.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $event:expr $(,)?) => {
        log::debug!("{} {}", $ctx, $event);
    };
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::debug!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={} "),*), $($value),*)
        );
    };
}
