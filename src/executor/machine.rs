//! Execution state machine
//!
//! `ExecutionEngine::handle` is called once per reconciliation tick with the
//! last persisted state and performs at most one transition:
//!
//! ```text
//! NotStarted ──grant──▶ Queued ──create──▶ Submitted ──cache──▶ Succeeded | Failed
//!     ▲  │denied            │failed create
//!     └──┘                  └──▶ Queued (creation_failure_count + 1)
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionGate, AllocationRequest, AllocationStatus};
use crate::cache::ExecutionCache;
use crate::config::EngineSettings;
use crate::context::CallContext;
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::ExecutorMetrics;
use crate::plugin::{RemotePlugin, TaskExecutionContext};
use crate::types::PhaseInfo;

use super::projector;
use super::state::{ExecutionPhase, ExecutionState};

/// Drives task executions for one plugin
pub struct ExecutionEngine {
    pub(super) plugin: Arc<dyn RemotePlugin>,
    cache: Arc<dyn ExecutionCache>,
    metrics: ExecutorMetrics,
    creation_failure_ceiling: u32,
}

impl ExecutionEngine {
    pub fn new(
        plugin: Arc<dyn RemotePlugin>,
        cache: Arc<dyn ExecutionCache>,
        metrics: ExecutorMetrics,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            plugin,
            cache,
            metrics,
            creation_failure_ceiling: settings.creation_failure_ceiling,
        }
    }

    pub fn plugin(&self) -> &Arc<dyn RemotePlugin> {
        &self.plugin
    }

    /// Reportable phase for a state
    pub fn phase_info(&self, state: &ExecutionState) -> PhaseInfo {
        projector::phase_info(state, self.creation_failure_ceiling)
    }

    /// Advance a task execution by at most one phase
    ///
    /// On error the caller keeps its previous state.
    pub async fn handle(
        &self,
        ctx: &CallContext,
        tctx: &TaskExecutionContext,
        state: ExecutionState,
    ) -> Result<ExecutionState> {
        let from = state.phase;
        let next = match from {
            ExecutionPhase::NotStarted => self.request_admission(ctx, tctx, state).await?,
            ExecutionPhase::Queued => self.create_resource(ctx, tctx, state).await?,
            ExecutionPhase::Submitted => self.observe(tctx, state).await?,
            ExecutionPhase::Succeeded | ExecutionPhase::Failed => return Ok(state),
        };

        if next.phase != from {
            info!(
                task = %tctx.metadata().task_execution_id,
                from = %from,
                to = %next.phase,
                command_id = next.command_id().unwrap_or_default(),
                "Phase transition"
            );
        }
        Ok(next)
    }

    // ─────────────────────────────────────────────────────────────
    // NotStarted
    // ─────────────────────────────────────────────────────────────

    async fn request_admission(
        &self,
        ctx: &CallContext,
        tctx: &TaskExecutionContext,
        mut state: ExecutionState,
    ) -> Result<ExecutionState> {
        let token_id = tctx.unique_id();

        let now = Utc::now();
        let started = *state.allocation_token_request_start_time.get_or_insert(now);
        let waited = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
        self.metrics.resource_wait_time.observe(waited);

        if !self.plugin.properties().requires_admission {
            state.phase = ExecutionPhase::Queued;
            return Ok(state);
        }

        let (namespace, constraints) = self
            .plugin
            .resource_requirements(ctx, tctx)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::BadTaskSpecification => e,
                _ => e.into_resource_manager(token_id),
            })?;

        let request = AllocationRequest {
            token_id: token_id.to_string(),
            project: tctx.metadata().project().to_string(),
            constraints,
        };
        let status = AdmissionGate::for_task(tctx).allocate(ctx, &namespace, &request).await?;

        match status {
            AllocationStatus::Granted => {
                state.phase = ExecutionPhase::Queued;
                Ok(state)
            }
            status if status.is_denied() => {
                self.metrics.admission_denied.inc();
                debug!(namespace = %namespace, token = token_id, status = %status, waited_secs = waited, "Admission denied");
                Ok(state)
            }
            status => Err(Error::resource_manager(
                token_id,
                format!("allocator returned {} for namespace {}", status, namespace),
            )),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Queued
    // ─────────────────────────────────────────────────────────────

    async fn create_resource(
        &self,
        ctx: &CallContext,
        tctx: &TaskExecutionContext,
        mut state: ExecutionState,
    ) -> Result<ExecutionState> {
        let key = match ctx.run("create", self.plugin.create(ctx, tctx)).await {
            Ok(key) => key,
            Err(e) if e.is_cancellation() || e.is_preparation_failure() => return Err(e),
            Err(e) => return Ok(self.count_creation_failure(tctx, state, &e)),
        };

        let command_id = match key.require_name("create") {
            Ok(id) => id.to_string(),
            Err(e) => return Ok(self.count_creation_failure(tctx, state, &e)),
        };

        state.phase = ExecutionPhase::Submitted;
        state.command_id = Some(command_id);
        state.uri = key.uri;

        let id = tctx.unique_id();
        self.cache
            .get_or_create(id, state.clone())
            .await
            .map_err(|e| e.into_cache_failure(id))?;
        Ok(state)
    }

    fn count_creation_failure(&self, tctx: &TaskExecutionContext, mut state: ExecutionState, err: &Error) -> ExecutionState {
        state.creation_failure_count = state.creation_failure_count.saturating_add(1);
        self.metrics.creation_failures.inc();
        warn!(
            task = %tctx.metadata().task_execution_id,
            attempts = state.creation_failure_count,
            error = %err,
            "Backend create failed"
        );
        state
    }

    // ─────────────────────────────────────────────────────────────
    // Submitted
    // ─────────────────────────────────────────────────────────────

    async fn observe(&self, tctx: &TaskExecutionContext, state: ExecutionState) -> Result<ExecutionState> {
        let id = tctx.unique_id();
        let cached = self
            .cache
            .get_or_create(id, state)
            .await
            .map_err(|e| e.into_cache_failure(id))?;

        if !cached.in_terminal_state() {
            return Ok(cached);
        }

        self.metrics.terminal_observed.inc();
        if cached.phase == ExecutionPhase::Succeeded {
            write_outputs(tctx, &cached).await?;
        }
        self.evict(id).await;
        Ok(cached)
    }

    /// Free the task's cache slot; a failed eviction only costs memory
    pub(super) async fn evict(&self, id: &str) {
        if let Err(e) = self.cache.evict(id).await {
            warn!(id, error = %e, "Cache eviction failed");
        }
    }
}

async fn write_outputs(tctx: &TaskExecutionContext, state: &ExecutionState) -> Result<()> {
    let outputs = json!({
        "command_id": state.command_id().unwrap_or_default(),
        "uri": state.uri.as_deref().unwrap_or_default(),
    });
    tctx.output_writer().put(outputs).await.map_err(|e| match e {
        e @ Error::Runtime(_) => e,
        e => Error::Runtime(format!("failed to write outputs: {}", e)),
    })
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("plugin", &self.plugin.properties().id)
            .field("creation_failure_ceiling", &self.creation_failure_ceiling)
            .finish_non_exhaustive()
    }
}
