//! Orchestrator-facing phase vocabulary
//!
//! Every plugin reports task progress through `PhaseInfo`, regardless of
//! which backend actually runs the task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Version used for phase reports that carry no retry information
pub const DEFAULT_PHASE_VERSION: u32 = 0;

// ─────────────────────────────────────────────────────────────────
// Phase
// ─────────────────────────────────────────────────────────────────

/// Universal task phase understood by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting on something before the task can be queued
    NotReady,
    /// Accepted but not yet running at the backend
    Queued,
    /// Running at the backend
    Running,
    /// Completed successfully
    Success,
    /// Failed, the orchestrator may retry the task
    RetryableFailure,
    /// Failed, retries will not help
    PermanentFailure,
}

impl Phase {
    /// Whether this phase ends the task
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Success | Phase::RetryableFailure | Phase::PermanentFailure
        )
    }

    /// Whether this phase is a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Phase::RetryableFailure | Phase::PermanentFailure)
    }

    /// Get the phase name
    pub fn name(&self) -> &'static str {
        match self {
            Phase::NotReady => "not_ready",
            Phase::Queued => "queued",
            Phase::Running => "running",
            Phase::Success => "success",
            Phase::RetryableFailure => "retryable_failure",
            Phase::PermanentFailure => "permanent_failure",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Info
// ─────────────────────────────────────────────────────────────────

/// Format of the resource behind a task log link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMessageFormat {
    Unknown,
    Csv,
    Json,
}

/// A link to logs or a console page for the remote execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLog {
    /// Display name
    pub name: String,

    /// Link target
    pub uri: String,

    /// Format of the linked content
    pub message_format: LogMessageFormat,
}

/// Structured information attached to a phase report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Log links
    pub logs: Vec<TaskLog>,

    /// When this information was produced
    pub occurred_at: DateTime<Utc>,
}

/// Who is responsible for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    User,
    System,
}

/// Failure details attached to a failed phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Short machine-readable code
    pub code: String,

    /// Human readable message
    pub message: String,

    /// Failure origin
    pub kind: FailureKind,
}

// ─────────────────────────────────────────────────────────────────
// Phase Info
// ─────────────────────────────────────────────────────────────────

/// A phase report for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub phase: Phase,

    /// Monotonic version within a phase, used to surface retry counts
    pub version: u32,

    /// Why the task is in this phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Failure details for failure phases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<ExecutionError>,

    /// Log links and timestamps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<TaskInfo>,
}

impl PhaseInfo {
    fn new(phase: Phase, version: u32, reason: Option<String>, info: Option<TaskInfo>) -> Self {
        Self {
            phase,
            version,
            reason,
            err: None,
            info,
        }
    }

    fn failed(phase: Phase, err: ExecutionError, info: Option<TaskInfo>) -> Self {
        Self {
            phase,
            version: DEFAULT_PHASE_VERSION,
            reason: Some(err.message.clone()),
            err: Some(err),
            info,
        }
    }

    /// Task cannot make progress yet
    pub fn not_ready(version: u32, reason: impl Into<String>) -> Self {
        Self::new(Phase::NotReady, version, Some(reason.into()), None)
    }

    /// Task is queued; `version` carries the retry count
    pub fn queued(version: u32, reason: impl Into<String>) -> Self {
        Self::new(Phase::Queued, version, Some(reason.into()), None)
    }

    /// Task is running at the backend
    pub fn running(version: u32, info: Option<TaskInfo>) -> Self {
        Self::new(Phase::Running, version, None, info)
    }

    /// Task succeeded
    pub fn success(info: Option<TaskInfo>) -> Self {
        Self::new(Phase::Success, DEFAULT_PHASE_VERSION, None, info)
    }

    /// Task failed for a reason attributed to the user or the backend
    pub fn failure(code: impl Into<String>, reason: impl Into<String>, info: Option<TaskInfo>) -> Self {
        Self::failed(
            Phase::RetryableFailure,
            ExecutionError {
                code: code.into(),
                message: reason.into(),
                kind: FailureKind::User,
            },
            info,
        )
    }

    /// Task failed for a system reason and may be retried
    pub fn system_retryable_failure(
        code: impl Into<String>,
        reason: impl Into<String>,
        info: Option<TaskInfo>,
    ) -> Self {
        Self::failed(
            Phase::RetryableFailure,
            ExecutionError {
                code: code.into(),
                message: reason.into(),
                kind: FailureKind::System,
            },
            info,
        )
    }

    /// Task failed and must not be retried
    pub fn permanent_failure(code: impl Into<String>, reason: impl Into<String>, info: Option<TaskInfo>) -> Self {
        Self::failed(
            Phase::PermanentFailure,
            ExecutionError {
                code: code.into(),
                message: reason.into(),
                kind: FailureKind::User,
            },
            info,
        )
    }

    /// Failure tagged with a taxonomy kind
    pub fn failure_of_kind(kind: ErrorKind, reason: impl Into<String>, info: Option<TaskInfo>) -> Self {
        Self::failure(kind.as_str(), reason, info)
    }

    /// Failure code, if this is a failure report
    pub fn error_code(&self) -> Option<&str> {
        self.err.as_ref().map(|e| e.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(!Phase::NotReady.is_terminal());
        assert!(!Phase::Queued.is_terminal());
        assert!(!Phase::Running.is_terminal());
        assert!(Phase::Success.is_terminal());
        assert!(Phase::RetryableFailure.is_terminal());
        assert!(Phase::PermanentFailure.is_failure());
    }

    #[test]
    fn test_system_failure_kind() {
        let info = PhaseInfo::system_retryable_failure("RemoteCreationFailure", "too many", None);
        assert_eq!(info.phase, Phase::RetryableFailure);
        assert_eq!(info.err.as_ref().map(|e| e.kind), Some(FailureKind::System));
        assert_eq!(info.error_code(), Some("RemoteCreationFailure"));
    }

    #[test]
    fn test_failure_of_kind() {
        let info = PhaseInfo::failure_of_kind(ErrorKind::DownstreamSystemError, "Query failed", None);
        assert_eq!(info.error_code(), Some("DownstreamSystemError"));
        assert_eq!(info.reason.as_deref(), Some("Query failed"));
    }

    #[test]
    fn test_queued_carries_version() {
        let info = PhaseInfo::queued(3, "waiting");
        assert_eq!(info.phase, Phase::Queued);
        assert_eq!(info.version, 3);
        assert!(info.err.is_none());
    }
}
