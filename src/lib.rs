//! remote-exec - plugin execution core for remote workflow tasks
//!
//! Tasks are handed to remote backends through `plugin::RemotePlugin`
//! implementations. The `executor` drives each task through admission,
//! creation and completion one step per reconciliation tick; completion is
//! observed through the shared `cache`, and `admission` bounds how many
//! tasks hold backend capacity per namespace.

pub mod admission;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod plugin;
pub mod secrets;
pub mod types;
pub mod version;

pub use context::CallContext;
pub use error::{Error, ErrorKind, Result};
