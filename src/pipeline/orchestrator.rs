//! Runs one pipeline per configured provider concurrently.
//!
//! Provider runs share no mutable state. The only synchronization point is
//! the join barrier at the end of [`Orchestrator::run`]. What a failed run
//! does to its siblings is decided by the [`FailurePolicy`].

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{Config, FailurePolicy};
use crate::error::{ConfigError, StageFailure};
use crate::logging::LogContext;
use crate::pipeline::runner::{PipelineRunner, RunOutcome, RunStatus};
use crate::pipeline::stages::initial_stage;
use crate::providers::{Collaborators, Provider, ProviderRegistry, ProviderStages};
use crate::{log_error, log_info};

/// Per-provider outcomes collected after the join barrier.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<RunOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_success())
    }

    pub fn outcome(&self, provider: Provider) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|o| o.provider == provider)
    }

    pub fn failures(&self) -> Vec<&StageFailure> {
        self.outcomes.iter().filter_map(|o| o.failure()).collect()
    }

    /// Human-readable summary, one line per provider.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            let _ = write!(
                out,
                "{:<6} {:<10} stages={}",
                outcome.provider.as_str(),
                outcome.status.as_str(),
                outcome.stages.len()
            );
            if let Some(failure) = outcome.failure() {
                let _ = write!(
                    out,
                    " stage={} kind={} class={} error={}",
                    failure.stage,
                    failure.kind(),
                    failure.class().as_str(),
                    failure.source
                );
            }
            out.push('\n');
        }
        let _ = write!(
            out,
            "{} of {} providers completed in {}ms",
            self.outcomes.iter().filter(|o| o.is_success()).count(),
            self.outcomes.len(),
            self.elapsed.as_millis()
        );
        out
    }
}

pub struct Orchestrator {
    pipelines: Vec<ProviderStages>,
    policy: FailurePolicy,
}

impl Orchestrator {
    pub fn new(pipelines: Vec<ProviderStages>, policy: FailurePolicy) -> Self {
        Self { pipelines, policy }
    }

    /// Build one pipeline per configured provider through the registry.
    pub fn from_config(
        config: &Config,
        registry: &ProviderRegistry,
        collaborators: &Collaborators,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipelines = config
            .providers
            .iter()
            .map(|provider| registry.build(provider, collaborators))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(pipelines, config.failure_policy))
    }

    /// Run every pipeline to a terminal state.
    ///
    /// Outcomes are reported in pipeline order, one per pipeline, including
    /// pipelines that were cancelled or whose task panicked.
    pub async fn run(self) -> RunReport {
        let started = Instant::now();
        let batch_id = format!("orch-{}", &Uuid::new_v4().to_string()[..8]);
        let ctx = LogContext::batch(&batch_id);
        let order: Vec<Provider> = self.pipelines.iter().map(|p| p.provider).collect();

        log_info!(
            ctx,
            "ORCHESTRATOR_START",
            providers = order
                .iter()
                .map(Provider::as_str)
                .collect::<Vec<_>>()
                .join(","),
            policy = format!("{:?}", self.policy)
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, RunOutcome)>();
        let mut handles = Vec::with_capacity(order.len());
        for (index, stages) in self.pipelines.into_iter().enumerate() {
            let provider = stages.provider;
            let done = done_tx.clone();
            handles.push(tokio::spawn(async move {
                let outcome = PipelineRunner::new(provider, initial_stage(stages))
                    .run()
                    .await;
                let _ = done.send((index, outcome));
            }));
        }
        drop(done_tx);

        // Closes once every task has reported, panicked or been aborted
        let mut slots: Vec<Option<RunOutcome>> = vec![None; order.len()];
        let mut aborted = false;
        while let Some((index, outcome)) = done_rx.recv().await {
            if !outcome.is_success() && self.policy == FailurePolicy::AbortAll && !aborted {
                log_error!(
                    ctx,
                    "ORCHESTRATOR_ABORT",
                    provider = outcome.provider,
                    reason = "first_failure"
                );
                for handle in &handles {
                    handle.abort();
                }
                aborted = true;
            }
            slots[index] = Some(outcome);
        }

        let mut outcomes = Vec::with_capacity(order.len());
        for (index, (handle, slot)) in handles.into_iter().zip(slots).enumerate() {
            let provider = order[index];
            let joined = handle.await;
            let outcome = match (slot, joined) {
                (Some(outcome), _) => outcome,
                (None, Err(e)) if e.is_panic() => {
                    log_error!(ctx, "PIPELINE_TASK_PANICKED", provider = provider, error = e);
                    RunOutcome::unfinished(provider, RunStatus::Panicked)
                }
                (None, _) => RunOutcome::unfinished(provider, RunStatus::Cancelled),
            };
            outcomes.push(outcome);
        }

        let report = RunReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        log_info!(
            ctx,
            "ORCHESTRATOR_COMPLETE",
            succeeded = report.outcomes.iter().filter(|o| o.is_success()).count(),
            failed = report.outcomes.iter().filter(|o| !o.is_success()).count(),
            elapsed_ms = report.elapsed.as_millis()
        );
        report
    }
}
