//! Reconciliation loop
//!
//! Drives task executions the way an orchestrator does: call the state
//! machine once per tick with the last state, report the projected phase,
//! and run Abort then Finalize once the task is done.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::plugin::TaskExecutionContext;
use crate::types::PhaseInfo;

use super::machine::ExecutionEngine;
use super::state::ExecutionState;

// ─────────────────────────────────────────────────────────────────
// Reconciler Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay between ticks of one task
    pub tick: Duration,

    /// Ticks before a task is given up on
    pub max_ticks: u32,

    /// Deadline for each blocking call
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            max_ticks: 600,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Final report for one task execution
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: String,
    pub generated_name: String,
    pub state: ExecutionState,
    pub phase: PhaseInfo,
    pub ticks: u32,
}

// ─────────────────────────────────────────────────────────────────
// Task Reconciler
// ─────────────────────────────────────────────────────────────────

/// Reconciles task executions against one engine
#[derive(Debug, Clone)]
pub struct TaskReconciler {
    config: ReconcilerConfig,
    engine: Arc<ExecutionEngine>,
}

impl TaskReconciler {
    pub fn new(config: ReconcilerConfig, engine: Arc<ExecutionEngine>) -> Self {
        Self { config, engine }
    }

    /// Reconcile every task concurrently until each one is done
    pub async fn reconcile_all(&self, ctx: &CallContext, tasks: Vec<TaskExecutionContext>) -> Result<Vec<TaskOutcome>> {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|tctx| {
                let reconciler = self.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { reconciler.reconcile(&ctx, tctx).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| Error::Internal(format!("reconcile task panicked: {}", e)))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Reconcile one task until its phase is terminal, then tear it down
    pub async fn reconcile(&self, ctx: &CallContext, tctx: TaskExecutionContext) -> TaskOutcome {
        let task = tctx.metadata().task_execution_id.id_string();
        let mut state = ExecutionState::new();
        let mut ticks = 0;

        let phase = loop {
            if ctx.is_cancelled() {
                break PhaseInfo::system_retryable_failure("Aborted", "Reconciliation was cancelled", None);
            }
            if ticks >= self.config.max_ticks {
                warn!(task = %task, ticks, phase = %state.phase, "Giving up on task");
                break PhaseInfo::system_retryable_failure(
                    "ReconcileTimeout",
                    format!("Task did not finish within {} ticks", ticks),
                    None,
                );
            }
            ticks += 1;

            let call_ctx = ctx.with_timeout(self.config.call_timeout);
            match self.engine.handle(&call_ctx, &tctx, state.clone()).await {
                Ok(next) => state = next,
                Err(e) if !e.kind().is_retryable() => {
                    error!(task = %task, error = %e, "Task failed permanently");
                    break PhaseInfo::permanent_failure(e.kind().as_str(), e.to_string(), None);
                }
                Err(e) => warn!(task = %task, error = %e, kind = %e.kind(), "Tick failed, will retry"),
            }

            let info = self.engine.phase_info(&state);
            if info.phase.is_terminal() {
                break info;
            }

            tokio::select! {
                _ = ctx.token().cancelled() => {}
                _ = tokio::time::sleep(self.config.tick) => {}
            }
        };

        self.teardown(&tctx, &state).await;
        info!(task = %task, phase = %phase.phase, ticks, "Task done");

        TaskOutcome {
            task,
            generated_name: tctx.unique_id().to_string(),
            state,
            phase,
            ticks,
        }
    }

    async fn teardown(&self, tctx: &TaskExecutionContext, state: &ExecutionState) {
        // Runs even when the reconcile context was cancelled
        let ctx = CallContext::background().with_timeout(self.config.call_timeout);

        if let Err(e) = self.engine.abort(&ctx, tctx, state).await {
            warn!(task = %tctx.unique_id(), error = %e, "Abort failed");
        }
        if let Err(e) = self.engine.finalize(&ctx, tctx).await {
            warn!(task = %tctx.unique_id(), error = %e, "Finalize failed");
        }
    }
}
