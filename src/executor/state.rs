//! Per-task execution state
//!
//! `ExecutionState` is the only durable artifact of the engine. The
//! orchestrator persists it between ticks and hands it back by value.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Execution Phase
// ─────────────────────────────────────────────────────────────────

/// Internal phase of one task execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Waiting for an admission token
    #[default]
    NotStarted,
    /// Token held, backend resource not yet created
    Queued,
    /// Backend resource created, completion observed through the cache
    Submitted,
    /// Backend reported success
    Succeeded,
    /// Backend reported failure
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Succeeded | ExecutionPhase::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionPhase::NotStarted => "NotStarted",
            ExecutionPhase::Queued => "Queued",
            ExecutionPhase::Submitted => "Submitted",
            ExecutionPhase::Succeeded => "Succeeded",
            ExecutionPhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────
// Execution State
// ─────────────────────────────────────────────────────────────────

/// Persisted state of one task execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub phase: ExecutionPhase,

    /// Backend command id, set once on submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,

    /// Backend console link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Failed status refreshes, independent of task retries
    #[serde(default)]
    pub sync_failure_count: u32,

    /// Failed backend creation attempts while queued
    #[serde(default)]
    pub creation_failure_count: u32,

    /// First time this execution asked for an admission token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_token_request_start_time: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_terminal_state(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_not_yet_submitted(&self) -> bool {
        matches!(self.phase, ExecutionPhase::NotStarted | ExecutionPhase::Queued)
    }

    /// Command id, treating an empty string as absent
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Copy of this state moved to a terminal phase
    pub fn with_phase(&self, phase: ExecutionPhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}
