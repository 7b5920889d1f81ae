//! Abort and Finalize hooks
//!
//! The orchestrator calls `abort` then `finalize`, once each, when a task
//! completes or is cancelled.

use tracing::{debug, info, warn};

use crate::admission::AdmissionGate;
use crate::context::CallContext;
use crate::error::Result;
use crate::plugin::{ResourceKey, TaskExecutionContext};

use super::machine::ExecutionEngine;
use super::state::ExecutionState;

impl ExecutionEngine {
    /// Best-effort cancel of the backend resource
    ///
    /// Only non-terminal executions with a backend command are cancelled.
    pub async fn abort(&self, ctx: &CallContext, tctx: &TaskExecutionContext, state: &ExecutionState) -> Result<()> {
        let task = &tctx.metadata().task_execution_id;
        if state.in_terminal_state() {
            debug!(task = %task, phase = %state.phase, "Abort skipped, execution already terminal");
            return Ok(());
        }
        let Some(command_id) = state.command_id() else {
            debug!(task = %task, phase = %state.phase, "Abort skipped, nothing submitted");
            return Ok(());
        };

        let mut key = ResourceKey::named(command_id);
        if let Some(uri) = &state.uri {
            key = key.with_uri(uri.clone());
        }

        match ctx.run("abort", self.plugin.delete(ctx, &key)).await {
            Ok(()) => {
                info!(task = %task, command_id, "Backend execution cancelled");
                Ok(())
            }
            Err(e) => {
                warn!(task = %task, command_id, error = %e, "Backend cancel failed");
                Err(e)
            }
        }
    }

    /// Release the task's admission token and its cache slot
    ///
    /// The token is released in the namespace the allocator recorded at
    /// grant time. Only allocators that record nothing make the namespace
    /// depend on the task template. Safe to call again after a successful
    /// release.
    pub async fn finalize(&self, ctx: &CallContext, tctx: &TaskExecutionContext) -> Result<()> {
        let token_id = tctx.unique_id();
        self.evict(token_id).await;

        if !self.plugin.properties().requires_admission {
            return Ok(());
        }

        let gate = AdmissionGate::for_task(tctx);
        let recorded = match gate.granted_namespace(ctx, token_id).await {
            Ok(recorded) => recorded,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!(token = token_id, error = %e, "Granted namespace lookup failed");
                None
            }
        };

        let namespace = match recorded {
            Some(namespace) => namespace,
            None => {
                let (namespace, _) = self
                    .plugin
                    .resource_requirements(ctx, tctx)
                    .await
                    .map_err(|e| e.into_resource_manager(token_id))?;
                namespace
            }
        };
        gate.lease(namespace, token_id).release(ctx).await
    }
}
