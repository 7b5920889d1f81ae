//! Query plugin
//!
//! Runs a SQL-like query on a remote query service. The query, an
//! optional cluster label override and tags come from the task template's
//! custom payload; the cluster label decides the admission namespace.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::admission::LabelResolver;
use crate::context::CallContext;
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::Counter;
use crate::secrets::SecretManager;
use crate::types::{LogMessageFormat, PhaseInfo, TaskExecutionMetadata, TaskInfo, TaskLog, TaskType};

use super::client::{CommandDetails, CommandStatus, QueryClient, QueryRequest};
use super::{
    PluginEntry, PluginProperties, PluginSetupContext, RemotePlugin, Resource, ResourceConstraintsSpec,
    ResourceKey, ResourceNamespace, TaskExecutionContext,
};

/// Registration id of the query plugin
pub const QUERY_PLUGIN_ID: &str = "query";

/// Hex characters of the name digest kept in resource names
const NAME_DIGEST_LEN: usize = 20;

// ─────────────────────────────────────────────────────────────────
// Template Payload
// ─────────────────────────────────────────────────────────────────

/// Query section of the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Query text, may reference inputs as `{{ .inputs.name }}`
    pub query: String,

    /// Server-side timeout in seconds, 0 for none
    #[serde(default)]
    pub timeout_sec: u32,
}

/// Custom payload of a query task template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryJob {
    /// Cluster label override
    #[serde(default)]
    pub cluster_label: String,

    /// Missing on templates produced by SDKs that predate this payload
    #[serde(default)]
    pub query: Option<QuerySpec>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// Query details extracted from a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub query: String,
    pub cluster_label: Option<String>,
    pub tags: Vec<String>,
    pub timeout_sec: u32,
}

// ─────────────────────────────────────────────────────────────────
// Plugin
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct QueryPluginMetrics {
    submitted: Counter,
    lookups: Counter,
    kills: Counter,
}

/// `RemotePlugin` for the remote query service
pub struct QueryPlugin {
    client: Arc<dyn QueryClient>,
    resolver: Arc<LabelResolver>,
    token_key: String,
    secrets: Arc<dyn SecretManager>,
    metrics: QueryPluginMetrics,
}

impl QueryPlugin {
    pub fn new(
        setup: &PluginSetupContext,
        client: Arc<dyn QueryClient>,
        resolver: Arc<LabelResolver>,
        token_key: impl Into<String>,
    ) -> Self {
        let scope = setup.metrics_scope();
        Self {
            client,
            resolver,
            token_key: token_key.into(),
            secrets: setup.secret_manager(),
            metrics: QueryPluginMetrics {
                submitted: scope.counter("submitted"),
                lookups: scope.counter("lookups"),
                kills: scope.counter("kills"),
            },
        }
    }

    /// Registration entry; the query plugin is the default plugin
    pub fn entry(client: Arc<dyn QueryClient>, resolver: Arc<LabelResolver>, token_key: impl Into<String>) -> PluginEntry {
        let token_key = token_key.into();
        PluginEntry::new(
            QUERY_PLUGIN_ID,
            vec![TaskType::from("hive"), TaskType::from(QUERY_PLUGIN_ID)],
            move |setup| {
                let plugin = QueryPlugin::new(&setup, client.clone(), resolver.clone(), token_key.clone());
                async move { Ok(Arc::new(plugin) as Arc<dyn RemotePlugin>) }
            },
        )
        .as_default()
    }

    /// Decode the query details of a task
    pub async fn query_info(&self, tctx: &TaskExecutionContext) -> Result<QueryInfo> {
        let template = tctx.task_reader().read().await?;
        let job: QueryJob = serde_json::from_value(template.custom).map_err(Error::TemplateDecode)?;
        let spec = job.query.ok_or_else(|| {
            Error::bad_task_spec("Query could not be found. Please ensure that you are on a supported SDK version.")
        })?;
        if spec.query.trim().is_empty() {
            return Err(Error::bad_task_spec("Query text is empty"));
        }

        let meta = tctx.metadata();
        let mut tags = job.tags;
        tags.push(format!("ns:{}", meta.namespace));
        tags.extend(meta.labels.iter().map(|(k, v)| format!("{}:{}", k, v)));

        let info = QueryInfo {
            query: spec.query,
            cluster_label: Some(job.cluster_label).filter(|l| !l.is_empty()),
            tags,
            timeout_sec: spec.timeout_sec,
        };
        debug!(
            task = %meta.task_execution_id,
            cluster_label = ?info.cluster_label,
            timeout_sec = info.timeout_sec,
            tags = ?info.tags,
            "Query info"
        );
        Ok(info)
    }

    /// Deterministic backend name for a task execution
    pub fn resource_name(&self, meta: &TaskExecutionMetadata) -> String {
        let mut hasher = Sha256::new();
        hasher.update(meta.project().as_bytes());
        hasher.update(b"/");
        hasher.update(meta.domain().as_bytes());
        hasher.update(b"/");
        hasher.update(meta.generated_name.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}-{}", self.properties().resource_name_prefix, &digest[..NAME_DIGEST_LEN])
    }

    async fn api_key(&self, secrets: &dyn SecretManager) -> Result<String> {
        secrets.get(&self.token_key).await
    }

    fn console_info(details: &CommandDetails) -> Option<TaskInfo> {
        if details.uri.is_empty() {
            return None;
        }
        Some(TaskInfo {
            logs: vec![TaskLog {
                name: format!("Query {}", details.id),
                uri: details.uri.clone(),
                message_format: LogMessageFormat::Unknown,
            }],
            occurred_at: Utc::now(),
        })
    }
}

#[async_trait]
impl RemotePlugin for QueryPlugin {
    fn properties(&self) -> PluginProperties {
        PluginProperties {
            id: QUERY_PLUGIN_ID.to_string(),
            resource_name_prefix: "rq".to_string(),
            requires_admission: true,
            max_batch_size: 10,
        }
    }

    async fn resource_requirements(
        &self,
        _ctx: &CallContext,
        tctx: &TaskExecutionContext,
    ) -> Result<(ResourceNamespace, ResourceConstraintsSpec)> {
        let info = self.query_info(tctx).await?;
        let meta = tctx.metadata();
        let namespace = self
            .resolver
            .namespace(info.cluster_label.as_deref(), meta.project(), meta.domain());
        Ok((namespace, ResourceConstraintsSpec::default()))
    }

    async fn create(&self, ctx: &CallContext, tctx: &TaskExecutionContext) -> Result<ResourceKey> {
        let api_key = self.api_key(tctx.secret_manager()).await?;
        let info = self.query_info(tctx).await?;
        let inputs = tctx.input_reader().get().await?;
        let meta = tctx.metadata();

        let request = QueryRequest {
            name: self.resource_name(meta),
            query: render_query(&info.query, &inputs)?,
            label: self
                .resolver
                .primary_label(info.cluster_label.as_deref(), meta.project(), meta.domain())
                .to_string(),
            tags: info.tags,
            timeout: info.timeout_sec,
        };

        ctx.check("submit")?;
        let details = self.client.submit(&request, &api_key).await?;
        self.metrics.submitted.inc();
        info!(
            task = %meta.task_execution_id,
            name = %request.name,
            command_id = %details.id,
            label = %request.label,
            "Query submitted"
        );

        let key = ResourceKey::named(details.id);
        Ok(if details.uri.is_empty() { key } else { key.with_uri(details.uri) })
    }

    async fn get(&self, ctx: &CallContext, key: &ResourceKey) -> Result<Resource> {
        let command_id = key.require_name("get")?;
        let api_key = self.api_key(self.secrets.as_ref()).await?;
        ctx.check("get")?;
        let details = self.client.command(command_id, &api_key).await?;
        self.metrics.lookups.inc();
        Resource::from_serializable(&details)
    }

    async fn delete(&self, ctx: &CallContext, key: &ResourceKey) -> Result<()> {
        let command_id = key.require_name("delete")?;
        let api_key = self.api_key(self.secrets.as_ref()).await?;
        ctx.check("delete")?;
        self.client.kill(command_id, &api_key).await?;
        self.metrics.kills.inc();
        info!(command_id, "Query cancelled");
        Ok(())
    }

    async fn status(&self, _ctx: &CallContext, resource: &Resource) -> Result<PhaseInfo> {
        let details: CommandDetails = resource.decode()?;
        let info = Self::console_info(&details);
        let phase = match details.status {
            CommandStatus::Waiting => PhaseInfo::queued(0, "Query waiting for cluster capacity"),
            CommandStatus::Running => PhaseInfo::running(0, info),
            CommandStatus::Done => PhaseInfo::success(info),
            CommandStatus::Error => {
                PhaseInfo::failure_of_kind(ErrorKind::DownstreamSystemError, "Query failed", info)
            }
            CommandStatus::Cancelled => {
                PhaseInfo::failure_of_kind(ErrorKind::DownstreamSystemError, "Query was cancelled", info)
            }
            CommandStatus::Unknown => {
                return Err(Error::backend(format!(
                    "unrecognized status for command {}",
                    details.id
                )))
            }
        };
        Ok(phase)
    }
}

// ─────────────────────────────────────────────────────────────────
// Query Templating
// ─────────────────────────────────────────────────────────────────

/// Substitute `{{ .inputs.name }}` placeholders with input values
///
/// String inputs are inserted verbatim, other values as JSON. A placeholder
/// naming an unknown input is a task specification error.
pub fn render_query(query: &str, inputs: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::bad_task_spec("Unterminated '{{' in query"))?;

        let expr = after[..end].trim();
        let name = expr
            .trim_start_matches('.')
            .strip_prefix("inputs.")
            .or_else(|| expr.trim_start_matches('.').strip_prefix("Inputs."))
            .ok_or_else(|| Error::bad_task_spec(format!("Unsupported placeholder '{{{{{}}}}}'", expr)))?;

        let value = inputs
            .get(name)
            .ok_or_else(|| Error::bad_task_spec(format!("Query references unknown input '{}'", name)))?;
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }

        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::InMemoryResourceManager;
    use crate::config::{ClusterConfig, ClusterSettings, QuotaSettings};
    use crate::metrics::MetricsScope;
    use crate::plugin::mock::MockQueryClient;
    use crate::secrets::StaticSecretManager;
    use crate::types::{
        MemoryInputReader, MemoryOutputWriter, OwnerReference, Phase, StaticTaskReader, TaskExecutionId,
        TaskTemplate,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn resolver() -> Arc<LabelResolver> {
        Arc::new(LabelResolver::from_settings(&ClusterSettings {
            default_primary_label: "default".to_string(),
            cluster_configs: vec![ClusterConfig {
                primary_label: "prod-1".to_string(),
                labels: vec!["teamA".to_string()],
            }],
            destination_cluster_configs: vec![],
        }))
    }

    fn secrets() -> Arc<StaticSecretManager> {
        Arc::new(StaticSecretManager::new().with_secret("query-token", "tok"))
    }

    fn plugin(client: Arc<MockQueryClient>) -> QueryPlugin {
        let setup = PluginSetupContext::new(MetricsScope::new("test"), secrets());
        QueryPlugin::new(&setup, client, resolver(), "query-token")
    }

    fn tctx(custom: Value, inputs: Value) -> TaskExecutionContext {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "data".to_string());
        let metadata = TaskExecutionMetadata {
            task_execution_id: TaskExecutionId {
                project: "p".to_string(),
                domain: "d".to_string(),
                execution_name: "e1".to_string(),
                node_id: "n0".to_string(),
                task_name: "q".to_string(),
                retry_attempt: 0,
            },
            namespace: "p-d".to_string(),
            labels,
            generated_name: "e1-n0-0".to_string(),
            owner_reference: OwnerReference::default(),
        };
        let inputs = match inputs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        TaskExecutionContext::new(
            metadata,
            Arc::new(StaticTaskReader::new(TaskTemplate::new("hive", custom))),
            Arc::new(MemoryInputReader::new(inputs)),
            Arc::new(MemoryOutputWriter::new()),
            Arc::new(InMemoryResourceManager::new(QuotaSettings::default())),
            secrets(),
        )
    }

    #[tokio::test]
    async fn test_query_info_tags() {
        let p = plugin(Arc::new(MockQueryClient::new()));
        let ctx = tctx(json!({"query": {"query": "select 1"}, "tags": ["adhoc"]}), json!({}));

        let info = p.query_info(&ctx).await.unwrap();
        assert_eq!(info.tags, vec!["adhoc", "ns:p-d", "team:data"]);
        assert_eq!(info.cluster_label, None);
    }

    #[tokio::test]
    async fn test_missing_query_is_bad_spec() {
        let p = plugin(Arc::new(MockQueryClient::new()));
        let err = p.query_info(&tctx(json!({"cluster_label": "teamA"}), json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadTaskSpecification);

        let err = p.query_info(&tctx(json!({"query": 5}), json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadTaskSpecification);
    }

    #[tokio::test]
    async fn test_resource_requirements_uses_override() {
        let p = plugin(Arc::new(MockQueryClient::new()));
        let ctx = tctx(json!({"cluster_label": "teamA", "query": {"query": "select 1"}}), json!({}));

        let (ns, _) = p.resource_requirements(&CallContext::background(), &ctx).await.unwrap();
        assert_eq!(ns.as_str(), "prod-1");
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let client = Arc::new(MockQueryClient::new());
        let p = plugin(client.clone());
        let ctx = tctx(json!({"query": {"query": "select {{ .inputs.n }}"}}), json!({"n": 3}));
        let call = CallContext::background();

        let first = p.create(&call, &ctx).await.unwrap();
        let second = p.create(&call, &ctx).await.unwrap();
        assert_eq!(first, second);
        assert!(first.uri.is_some());
        assert_eq!(client.command_count(), 1);
        assert_eq!(
            client.command_id_for(&p.resource_name(ctx.metadata())),
            first.name
        );
    }

    #[tokio::test]
    async fn test_create_without_secret_is_runtime_failure() {
        let client = Arc::new(MockQueryClient::new());
        let setup = PluginSetupContext::new(MetricsScope::new("test"), secrets());
        let p = QueryPlugin::new(&setup, client.clone(), resolver(), "other-key");

        let err = p
            .create(&CallContext::background(), &tctx(json!({"query": {"query": "select 1"}}), json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeFailure);
        assert_eq!(client.call_counts().submit, 0);
    }

    #[tokio::test]
    async fn test_get_and_status() {
        let client = Arc::new(MockQueryClient::new());
        let p = plugin(client.clone());
        let call = CallContext::background();
        let key = p
            .create(&call, &tctx(json!({"query": {"query": "select 1"}}), json!({})))
            .await
            .unwrap();

        let resource = p.get(&call, &key).await.unwrap();
        let phase = p.status(&call, &resource).await.unwrap();
        assert_eq!(phase.phase, Phase::Running);
        assert!(phase.info.is_some());

        client.set_status(key.name.as_deref().unwrap(), CommandStatus::Error);
        let resource = p.get(&call, &key).await.unwrap();
        let phase = p.status(&call, &resource).await.unwrap();
        assert!(phase.phase.is_failure());
        assert_eq!(phase.error_code(), Some("DownstreamSystemError"));
    }

    #[tokio::test]
    async fn test_status_unknown_is_error() {
        let p = plugin(Arc::new(MockQueryClient::new()));
        let resource = Resource::new(json!({"id": "Q1", "status": "paused"}));
        assert!(p.status(&CallContext::background(), &resource).await.is_err());
    }

    #[test]
    fn test_resource_name_is_deterministic() {
        let p = plugin(Arc::new(MockQueryClient::new()));
        let ctx = tctx(json!({}), json!({}));
        let name = p.resource_name(ctx.metadata());

        assert_eq!(name, p.resource_name(ctx.metadata()));
        assert!(name.starts_with("rq-"));
        assert_eq!(name.len(), 3 + NAME_DIGEST_LEN);
    }

    #[test]
    fn test_render_query() {
        let mut inputs = Map::new();
        inputs.insert("ds".to_string(), json!("2024-01-01"));
        inputs.insert("limit".to_string(), json!(10));

        let q = render_query("select * from t where ds = '{{ .inputs.ds }}' limit {{.Inputs.limit}}", &inputs).unwrap();
        assert_eq!(q, "select * from t where ds = '2024-01-01' limit 10");

        assert_eq!(render_query("select 1", &inputs).unwrap(), "select 1");
        assert!(render_query("{{ .inputs.missing }}", &inputs).is_err());
        assert!(render_query("{{ .inputs.ds ", &inputs).is_err());
        assert!(render_query("{{ now() }}", &inputs).is_err());
    }
}
