//! Type definitions for the remote execution core
//!
//! This module contains the orchestrator-facing phase vocabulary, task
//! identity and the per-invocation readers/writers.

mod io;
mod phase;
mod task;

pub use io::*;
pub use phase::*;
pub use task::*;
