//! Task execution
//!
//! - `state`: the persisted per-task state
//! - `machine`: the one-step transition function
//! - `projector`: state → orchestrator phase
//! - `lifecycle`: Abort and Finalize
//! - `runner`: a reconciliation loop driving the above

mod lifecycle;
mod machine;
pub mod projector;
mod runner;
mod state;

pub use machine::ExecutionEngine;
pub use projector::{phase_info, REMOTE_CREATION_FAILURE};
pub use runner::{ReconcilerConfig, TaskOutcome, TaskReconciler};
pub use state::{ExecutionPhase, ExecutionState};
