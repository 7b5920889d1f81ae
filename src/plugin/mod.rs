//! Remote execution plugins
//!
//! - `traits`: the `RemotePlugin` contract and its value types
//! - `context`: setup-time and per-invocation capabilities
//! - `registry`: registration, default selection and loading
//! - `query`: plugin for a remote query service
//! - `client` / `mock`: HTTP and simulated query service clients

pub mod client;
mod context;
pub mod mock;
pub mod query;
mod registry;
mod traits;

pub use client::{CommandDetails, CommandStatus, HttpQueryClient, QueryClient, QueryRequest};
pub use context::{PluginSetupContext, TaskExecutionContext};
pub use mock::{MockQueryClient, MockQueryConfig};
pub use query::{QueryJob, QueryPlugin, QuerySpec, QUERY_PLUGIN_ID};
pub use registry::{LoadedPlugins, PluginEntry, PluginLoader, PluginRegistry, PluginRegistryBuilder};
pub use traits::{
    PluginProperties, RemotePlugin, Resource, ResourceConstraintsSpec, ResourceKey, ResourceNamespace,
};
