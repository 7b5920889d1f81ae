//! Execution state → orchestrator phase

use chrono::Utc;

use crate::error::ErrorKind;
use crate::types::{LogMessageFormat, PhaseInfo, TaskInfo, TaskLog};

use super::state::{ExecutionPhase, ExecutionState};

/// Failure code reported once creation retries pass the ceiling
pub const REMOTE_CREATION_FAILURE: &str = "RemoteCreationFailure";

/// Default number of failed creates tolerated before giving up
pub const DEFAULT_CREATION_FAILURE_CEILING: u32 = 5;

/// Project an execution state onto the orchestrator's phase vocabulary
pub fn phase_info(state: &ExecutionState, creation_failure_ceiling: u32) -> PhaseInfo {
    match state.phase {
        ExecutionPhase::NotStarted => PhaseInfo::not_ready(0, "Waiting for an admission token"),
        ExecutionPhase::Queued => {
            if state.creation_failure_count > creation_failure_ceiling {
                PhaseInfo::system_retryable_failure(
                    REMOTE_CREATION_FAILURE,
                    format!(
                        "Backend creation failed {} times",
                        state.creation_failure_count
                    ),
                    None,
                )
            } else {
                PhaseInfo::queued(
                    state.creation_failure_count,
                    "Waiting for the backend to launch the task",
                )
            }
        }
        ExecutionPhase::Submitted => PhaseInfo::running(0, construct_task_info(state)),
        ExecutionPhase::Succeeded => PhaseInfo::success(construct_task_info(state)),
        ExecutionPhase::Failed => PhaseInfo::failure_of_kind(
            ErrorKind::DownstreamSystemError,
            "Query failed",
            construct_task_info(state),
        ),
    }
}

/// Task info for a state with a backend command, `None` otherwise
pub fn construct_task_info(state: &ExecutionState) -> Option<TaskInfo> {
    state.command_id()?;
    Some(TaskInfo {
        logs: vec![construct_task_log(state)],
        occurred_at: Utc::now(),
    })
}

/// Log link pointing at the backend console
pub fn construct_task_log(state: &ExecutionState) -> TaskLog {
    TaskLog {
        name: format!(
            "Status: {} [{}]",
            state.phase,
            state.command_id.as_deref().unwrap_or_default()
        ),
        uri: state.uri.clone().unwrap_or_default(),
        message_format: LogMessageFormat::Unknown,
    }
}
