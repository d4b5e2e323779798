//! Drives one provider's stage chain to a terminal state.
//!
//! Running -> Completed when a successful stage yields no next stage.
//! Running -> Failed on the first failing `handle()`; `next()` is never
//! consulted after a failure and no stage is revisited.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::{ErrorClass, StageFailure};
use crate::logging::structured::LogContext;
use crate::pipeline::stages::Stage;
use crate::providers::Provider;
use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    Completed,
    Failed,
}

/// Terminal status of one provider run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Content key published.
    Completed,
    /// First error encountered.
    Failed(StageFailure),
    /// Aborted because a sibling run failed.
    Cancelled,
    /// The run's task panicked.
    Panicked,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed(_) => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Panicked => "panicked",
        }
    }
}

/// Result of one provider run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub provider: Provider,
    pub run_id: String,
    pub status: RunStatus,
    /// Names of the stages whose `handle()` was called, in order.
    pub stages: Vec<&'static str>,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Outcome for a run that never reached a terminal state of its own.
    pub fn unfinished(provider: Provider, status: RunStatus) -> Self {
        Self {
            provider,
            run_id: String::new(),
            status,
            stages: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.status {
            RunStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

pub struct PipelineRunner {
    provider: Provider,
    ctx: LogContext,
    current: Option<Box<dyn Stage>>,
    state: RunnerState,
    history: Vec<&'static str>,
}

impl PipelineRunner {
    pub fn new(provider: Provider, initial: Box<dyn Stage>) -> Self {
        let run_id = format!("run-{}", &Uuid::new_v4().to_string()[..8]);
        Self {
            provider,
            ctx: LogContext::new(&run_id, provider.as_str()),
            current: Some(initial),
            state: RunnerState::Running,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn run_id(&self) -> &str {
        &self.ctx.run_id
    }

    /// Run every stage in chain order until the chain ends or a stage fails.
    pub async fn run(mut self) -> RunOutcome {
        let started = Instant::now();
        log_info!(self.ctx, "PIPELINE_START", provider = self.provider);

        let mut failure = None;
        while let Some(mut stage) = self.current.take() {
            let name = stage.name();
            let stage_ctx = self.ctx.with_stage(name);
            self.history.push(name);
            log_debug!(stage_ctx, "STAGE_START");

            if let Err(source) = stage.handle(&stage_ctx).await {
                let err = StageFailure::new(self.provider, name, source);
                match err.class() {
                    ErrorClass::Security => {
                        log_error!(stage_ctx, "SECURITY_ALERT", kind = err.kind(), error = err.source);
                    }
                    class => {
                        log_warn!(
                            stage_ctx,
                            "STAGE_FAILED",
                            kind = err.kind(),
                            class = class.as_str(),
                            error = err.source
                        );
                    }
                }
                self.state = RunnerState::Failed;
                failure = Some(err);
                break;
            }

            log_debug!(stage_ctx, "STAGE_COMPLETE");
            self.current = stage.next();
        }

        let elapsed = started.elapsed();
        let status = match failure {
            Some(err) => RunStatus::Failed(err),
            None => {
                self.state = RunnerState::Completed;
                log_info!(
                    self.ctx,
                    "PIPELINE_COMPLETE",
                    stages = self.history.len(),
                    elapsed_ms = elapsed.as_millis()
                );
                RunStatus::Completed
            }
        };

        RunOutcome {
            provider: self.provider,
            run_id: self.ctx.run_id.clone(),
            status,
            stages: self.history,
            elapsed,
        }
    }
}
