//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure: config fixtures and an
//! engine wired to the simulated query service.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use remote_exec::admission::{InMemoryResourceManager, LabelResolver, ResourceManager};
use remote_exec::cache::AutoRefreshCache;
use remote_exec::config::{
    CacheSettings, ClusterConfig, ClusterSettings, DestinationClusterConfig, EngineSettings, QuotaSettings,
};
use remote_exec::executor::ExecutionEngine;
use remote_exec::metrics::{ExecutorMetrics, MetricsScope};
use remote_exec::plugin::{
    MockQueryClient, MockQueryConfig, PluginRegistry, PluginSetupContext, QueryPlugin, RemotePlugin,
    TaskExecutionContext,
};
use remote_exec::secrets::StaticSecretManager;
use remote_exec::types::{
    MemoryInputReader, MemoryOutputWriter, OutputWriter, OwnerReference, StaticTaskReader, TaskExecutionId,
    TaskExecutionMetadata, TaskReader, TaskTemplate, TaskType,
};

pub const TOKEN_KEY: &str = "query-token";

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// teamA → prod-1, teamB → prod-2, (p, d) → teamB, default otherwise
pub fn clusters() -> ClusterSettings {
    ClusterSettings {
        default_primary_label: "default".to_string(),
        cluster_configs: vec![
            ClusterConfig {
                primary_label: "prod-1".to_string(),
                labels: vec!["teamA".to_string()],
            },
            ClusterConfig {
                primary_label: "prod-2".to_string(),
                labels: vec!["teamB".to_string()],
            },
        ],
        destination_cluster_configs: vec![DestinationClusterConfig {
            project: "p".to_string(),
            domain: "d".to_string(),
            cluster_label: "teamB".to_string(),
        }],
    }
}

/// Template payload for a query task
pub fn query_payload(label: Option<&str>, query: &str) -> Value {
    json!({
        "cluster_label": label.unwrap_or_default(),
        "query": { "query": query, "timeout_sec": 60 },
        "tags": ["test"],
    })
}

// ─────────────────────────────────────────────────────────────────
// Engine Harness
// ─────────────────────────────────────────────────────────────────

/// Engine, cache, allocator and simulated service wired together
pub struct Harness {
    pub client: Arc<MockQueryClient>,
    pub manager: Arc<InMemoryResourceManager>,
    pub cache: Arc<AutoRefreshCache>,
    pub plugin: Arc<dyn RemotePlugin>,
    pub engine: ExecutionEngine,
    pub secrets: Arc<StaticSecretManager>,
    pub scope: MetricsScope,
}

impl Harness {
    pub async fn new(mock: MockQueryConfig, quotas: QuotaSettings) -> Self {
        Self::with_settings(mock, quotas, EngineSettings::default()).await
    }

    pub async fn with_settings(mock: MockQueryConfig, quotas: QuotaSettings, settings: EngineSettings) -> Self {
        Self::build(mock, quotas, settings, 1000).await
    }

    /// Harness whose cache holds at most `max_size` entries
    pub async fn with_cache_capacity(mock: MockQueryConfig, quotas: QuotaSettings, max_size: usize) -> Self {
        Self::build(mock, quotas, EngineSettings::default(), max_size).await
    }

    async fn build(mock: MockQueryConfig, quotas: QuotaSettings, settings: EngineSettings, max_size: usize) -> Self {
        let client = Arc::new(MockQueryClient::with_config(mock));
        let secrets = Arc::new(StaticSecretManager::new().with_secret(TOKEN_KEY, "test-token"));
        let scope = MetricsScope::new("test");

        let mut builder = PluginRegistry::builder();
        builder
            .register(QueryPlugin::entry(
                client.clone(),
                Arc::new(LabelResolver::from_settings(&clusters())),
                TOKEN_KEY,
            ))
            .unwrap();
        let plugins = builder
            .build()
            .load(&PluginSetupContext::new(scope.clone(), secrets.clone()))
            .await
            .unwrap();
        let plugin = plugins.resolve(&TaskType::from("hive")).unwrap();

        let cache = Arc::new(AutoRefreshCache::new(
            "test",
            CacheSettings {
                resync_period_ms: 10,
                workers: 2,
                batch_size: 10,
                max_size,
            },
            &scope,
        ));
        let engine = ExecutionEngine::new(plugin.clone(), cache.clone(), ExecutorMetrics::new(&scope), &settings);

        Self {
            client,
            manager: Arc::new(InMemoryResourceManager::new(quotas)),
            cache,
            plugin,
            engine,
            secrets,
            scope,
        }
    }

    /// Task in project `p`, domain `d`
    pub fn task(&self, generated_name: &str, custom: Value) -> TaskExecutionContext {
        self.task_in("p", "d", generated_name, custom, MemoryOutputWriter::new())
    }

    pub fn task_in(
        &self,
        project: &str,
        domain: &str,
        generated_name: &str,
        custom: Value,
        outputs: MemoryOutputWriter,
    ) -> TaskExecutionContext {
        self.task_from(
            project,
            domain,
            generated_name,
            Arc::new(StaticTaskReader::new(TaskTemplate::new("hive", custom))),
            Arc::new(outputs),
            self.manager.clone(),
        )
    }

    /// Task in project `p`, domain `d` with its own template reader and allocator
    pub fn task_with(
        &self,
        generated_name: &str,
        reader: Arc<dyn TaskReader>,
        manager: Arc<dyn ResourceManager>,
    ) -> TaskExecutionContext {
        self.task_from("p", "d", generated_name, reader, Arc::new(MemoryOutputWriter::new()), manager)
    }

    fn task_from(
        &self,
        project: &str,
        domain: &str,
        generated_name: &str,
        reader: Arc<dyn TaskReader>,
        outputs: Arc<dyn OutputWriter>,
        manager: Arc<dyn ResourceManager>,
    ) -> TaskExecutionContext {
        let metadata = TaskExecutionMetadata {
            task_execution_id: TaskExecutionId {
                project: project.to_string(),
                domain: domain.to_string(),
                execution_name: "e1".to_string(),
                node_id: generated_name.to_string(),
                task_name: "query".to_string(),
                retry_attempt: 0,
            },
            namespace: format!("{}-{}", project, domain),
            labels: BTreeMap::new(),
            generated_name: generated_name.to_string(),
            owner_reference: OwnerReference::default(),
        };

        TaskExecutionContext::new(
            metadata,
            reader,
            Arc::new(MemoryInputReader::new(Map::new())),
            outputs,
            manager,
            self.secrets.clone(),
        )
    }
}
