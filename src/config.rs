//! Configuration system for the remote execution core
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (REMOTE_EXEC_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! The cluster label tables are resolved once at load time and are
//! read-only afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// State machine settings
    pub engine: EngineSettings,

    /// Cluster label resolution tables
    pub clusters: ClusterSettings,

    /// Admission quotas for the in-process allocator
    pub quotas: QuotaSettings,

    /// Status cache settings
    pub cache: CacheSettings,

    /// Remote query service connection
    pub service: QueryServiceSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// State machine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Creation failures tolerated before a queued task is reported failed
    pub creation_failure_ceiling: u32,

    /// Secret key holding the query service API token
    pub token_key: String,

    /// Timeout applied to each blocking backend call, in seconds
    pub call_timeout_secs: u64,
}

/// One backend cluster and the labels that route to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Label used as the admission namespace and sent to the backend
    pub primary_label: String,

    /// Labels that resolve to `primary_label`
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Default cluster label for a (project, domain) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationClusterConfig {
    pub project: String,
    pub domain: String,
    pub cluster_label: String,
}

/// Cluster label resolution tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Primary label used when nothing else maps
    pub default_primary_label: String,

    /// Label → primary label table
    pub cluster_configs: Vec<ClusterConfig>,

    /// (project, domain) → label table
    pub destination_cluster_configs: Vec<DestinationClusterConfig>,
}

/// Admission quotas for the in-process allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    /// Tokens per namespace when the namespace has no explicit entry
    pub default_limit: usize,

    /// Per-namespace token limits
    pub namespaces: BTreeMap<String, usize>,
}

/// Status cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Interval between background refresh rounds, in milliseconds
    pub resync_period_ms: u64,

    /// Concurrent refresh workers (0 = number of CPUs)
    pub workers: usize,

    /// Entries per refresh batch
    pub batch_size: usize,

    /// Maximum number of cached entries
    pub max_size: usize,
}

/// Remote query service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryServiceSettings {
    /// API base URL
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    pub max_retries: u32,

    /// First retry delay in milliseconds
    pub initial_backoff_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            creation_failure_ceiling: 5,
            token_key: "query-token".to_string(),
            call_timeout_secs: 30,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            default_primary_label: "default".to_string(),
            cluster_configs: vec![],
            destination_cluster_configs: vec![],
        }
    }
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            default_limit: 10,
            namespaces: BTreeMap::new(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            resync_period_ms: 30_000,
            workers: 0, // Auto-detect
            batch_size: 10,
            max_size: 50_000,
        }
    }
}

impl Default for QueryServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.query-service.example.com/api/v1.2".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl CacheSettings {
    /// Refresh interval as a duration
    pub fn resync_period(&self) -> Duration {
        Duration::from_millis(self.resync_period_ms)
    }

    /// Effective number of refresh workers
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().min(8)
        } else {
            self.workers
        }
    }
}

impl EngineSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl QuotaSettings {
    /// Token limit for a namespace
    pub fn limit_for(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

impl EngineConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = Self::from_toml(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("remote-exec.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("remote-exec").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".remote-exec").join("config.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/remote-exec/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Engine settings
        if let Ok(val) = std::env::var("REMOTE_EXEC_CREATION_FAILURE_CEILING") {
            if let Ok(n) = val.parse() {
                self.engine.creation_failure_ceiling = n;
            }
        }
        if let Ok(val) = std::env::var("REMOTE_EXEC_TOKEN_KEY") {
            self.engine.token_key = val;
        }
        if let Ok(val) = std::env::var("REMOTE_EXEC_CALL_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.engine.call_timeout_secs = n;
            }
        }

        // Cluster settings
        if let Ok(val) = std::env::var("REMOTE_EXEC_DEFAULT_PRIMARY_LABEL") {
            self.clusters.default_primary_label = val;
        }

        // Quota settings
        if let Ok(val) = std::env::var("REMOTE_EXEC_DEFAULT_QUOTA") {
            if let Ok(n) = val.parse() {
                self.quotas.default_limit = n;
            }
        }

        // Cache settings
        if let Ok(val) = std::env::var("REMOTE_EXEC_RESYNC_PERIOD_MS") {
            if let Ok(n) = val.parse() {
                self.cache.resync_period_ms = n;
            }
        }
        if let Ok(val) = std::env::var("REMOTE_EXEC_CACHE_WORKERS") {
            if let Ok(n) = val.parse() {
                self.cache.workers = n;
            }
        }

        // Service settings
        if let Ok(val) = std::env::var("REMOTE_EXEC_SERVICE_URL") {
            self.service.base_url = val;
        }
        if let Ok(val) = std::env::var("REMOTE_EXEC_SERVICE_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.service.timeout_secs = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("REMOTE_EXEC_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("REMOTE_EXEC_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("REMOTE_EXEC_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.clusters.default_primary_label.is_empty() {
            return Err(Error::config_field_invalid(
                "clusters.default_primary_label",
                "default primary label cannot be empty",
            ));
        }

        // A label must resolve to exactly one primary label
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for cluster in &self.clusters.cluster_configs {
            if cluster.primary_label.is_empty() {
                return Err(Error::config_field_invalid(
                    "clusters.cluster_configs.primary_label",
                    "primary label cannot be empty",
                ));
            }
            for label in &cluster.labels {
                if let Some(previous) = seen.insert(label.as_str(), cluster.primary_label.as_str()) {
                    if previous != cluster.primary_label {
                        return Err(Error::config_field_invalid(
                            "clusters.cluster_configs.labels",
                            format!(
                                "label '{}' maps to both '{}' and '{}'",
                                label, previous, cluster.primary_label
                            ),
                        ));
                    }
                }
            }
        }

        if self.cache.batch_size == 0 {
            return Err(Error::config_field_invalid(
                "cache.batch_size",
                "batch size must be at least 1",
            ));
        }
        if self.cache.resync_period_ms == 0 {
            return Err(Error::config_field_invalid(
                "cache.resync_period_ms",
                "resync period must be positive",
            ));
        }

        match url::Url::parse(&self.service.base_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => {
                return Err(Error::config_field_invalid(
                    "service.base_url",
                    "service URL must be an http:// or https:// URL",
                ));
            }
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".remote-exec")
                .join("config.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# remote-exec configuration

[engine]
# Creation failures tolerated before a queued task is reported as failed
creation_failure_ceiling = 5

# Secret key holding the query service API token
token_key = "query-token"

# Timeout for each blocking backend call, in seconds
call_timeout_secs = 30

[clusters]
# Primary label used when no mapping applies
default_primary_label = "default"

# Labels routed to a primary cluster label
# [[clusters.cluster_configs]]
# primary_label = "prod-1"
# labels = ["teamA", "etl"]

# Default cluster label for a (project, domain) pair
# [[clusters.destination_cluster_configs]]
# project = "analytics"
# domain = "production"
# cluster_label = "etl"

[quotas]
# Tokens per namespace unless overridden below
default_limit = 10

[quotas.namespaces]
# prod-1 = 50

[cache]
# Interval between background status refreshes (milliseconds)
resync_period_ms = 30000

# Concurrent refresh workers (0 = number of CPUs)
workers = 0

# Entries polled per refresh batch
batch_size = 10

# Maximum number of cached executions
max_size = 50000

[service]
# Query service API base URL
base_url = "https://api.query-service.example.com/api/v1.2"

# Request timeout in seconds
timeout_secs = 30

# Maximum retries on transient failures
max_retries = 3

# First retry delay in milliseconds
initial_backoff_ms = 500

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.remote-exec/logs/remote-exec.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
