//! Error types for the remote execution core
//!
//! Provides structured error handling with:
//! - A task-level taxonomy (`ErrorKind`) the orchestrator understands
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoNotFound = 203,

    // Task specification errors (3xx)
    BadTaskSpecification = 300,
    TemplateDecode = 301,

    // Admission errors (4xx)
    ResourceManagerFailure = 400,
    AllocationRejected = 401,

    // Cache errors (5xx)
    CacheFailed = 500,
    CacheCorrupted = 501,
    CacheFull = 502,

    // Backend errors (6xx)
    BackendRequest = 600,
    BackendTimeout = 601,
    DownstreamSystemError = 602,

    // Plugin errors (7xx)
    PluginNotFound = 700,
    PluginRegistration = 701,
    PluginLoadFailed = 702,

    // Runtime errors (8xx)
    RuntimeFailure = 800,
    SecretNotFound = 801,
    Cancelled = 802,
    Serialization = 803,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 902,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Task specification errors
            400..=499 => 40, // Admission errors
            500..=599 => 50, // Cache errors
            600..=699 => 60, // Backend errors
            700..=799 => 70, // Plugin errors
            800..=899 => 80, // Runtime errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Error Taxonomy
// ─────────────────────────────────────────────────────────────────

/// Failure category reported to the orchestrator alongside an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed backend payload; surfaced immediately, never retried
    BadTaskSpecification,
    /// Admission allocator malfunction; retried on the next tick
    ResourceManagerFailure,
    /// Cache facade malfunction or entry corruption; retried
    CacheFailed,
    /// Unexpected local error (secret fetch, output write, ...)
    RuntimeFailure,
    /// Terminal failure reported by the remote backend
    DownstreamSystemError,
}

impl ErrorKind {
    /// Stable name used as the failure code in phase reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadTaskSpecification => "BadTaskSpecification",
            ErrorKind::ResourceManagerFailure => "ResourceManagerFailure",
            ErrorKind::CacheFailed => "CacheFailed",
            ErrorKind::RuntimeFailure => "RuntimeFailure",
            ErrorKind::DownstreamSystemError => "DownstreamSystemError",
        }
    }

    /// Whether the orchestrator may retry the same tick
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::BadTaskSpecification)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Task Specification Errors
    // ─────────────────────────────────────────────────────────────

    /// The task template payload is missing required fields
    #[error("Bad task specification: {message}")]
    BadTaskSpecification { message: String },

    /// The task template payload could not be decoded
    #[error("Failed to decode task template: {0}")]
    TemplateDecode(#[source] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Admission Errors
    // ─────────────────────────────────────────────────────────────

    /// The admission allocator failed or returned an unexpected result
    #[error("Resource manager failure for token {token_id}: {message}")]
    ResourceManager { token_id: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Cache Errors
    // ─────────────────────────────────────────────────────────────

    /// The status cache could not serve the request
    #[error("Cache failure for key {key}: {message}")]
    CacheFailed { key: String, message: String },

    /// The status cache is at capacity
    #[error("Cache is full ({capacity} entries), cannot insert {key}")]
    CacheFull { key: String, capacity: usize },

    // ─────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────

    /// A request to the remote backend failed
    #[error("Backend request failed: {message}")]
    BackendRequest { message: String, status: Option<u16> },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote backend reported a terminal failure
    #[error("Downstream system error: {message}")]
    Downstream { message: String },

    // ─────────────────────────────────────────────────────────────
    // Plugin Errors
    // ─────────────────────────────────────────────────────────────

    /// No plugin registered for a task type
    #[error("No plugin registered for task type: {task_type}")]
    PluginNotFound { task_type: String },

    /// Plugin registration was rejected
    #[error("Plugin registration rejected for {id}: {reason}")]
    PluginRegistration { id: String, reason: String },

    /// Plugin loader failed
    #[error("Failed to load plugin {id}: {message}")]
    PluginLoadFailed { id: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────

    /// Secret lookup failed
    #[error("Secret not found: {key}")]
    SecretNotFound { key: String },

    /// JSON encoding or decoding outside the task template
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected local failure
    #[error("Runtime failure: {0}")]
    Runtime(String),

    /// The caller cancelled the in-flight operation
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// The caller's deadline elapsed during the operation
    #[error("Operation {operation} exceeded its deadline")]
    DeadlineExceeded { operation: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::BadTaskSpecification { .. } => ErrorCode::BadTaskSpecification,
            Error::TemplateDecode(_) => ErrorCode::TemplateDecode,

            Error::ResourceManager { .. } => ErrorCode::ResourceManagerFailure,

            Error::CacheFailed { .. } => ErrorCode::CacheFailed,
            Error::CacheFull { .. } => ErrorCode::CacheFull,

            Error::BackendRequest { .. } => ErrorCode::BackendRequest,
            Error::Http(e) if e.is_timeout() => ErrorCode::BackendTimeout,
            Error::Http(_) => ErrorCode::BackendRequest,
            Error::Downstream { .. } => ErrorCode::DownstreamSystemError,

            Error::PluginNotFound { .. } => ErrorCode::PluginNotFound,
            Error::PluginRegistration { .. } => ErrorCode::PluginRegistration,
            Error::PluginLoadFailed { .. } => ErrorCode::PluginLoadFailed,

            Error::SecretNotFound { .. } => ErrorCode::SecretNotFound,
            Error::Runtime(_) => ErrorCode::RuntimeFailure,
            Error::Json(_) => ErrorCode::Serialization,
            Error::Cancelled { .. } => ErrorCode::Cancelled,
            Error::DeadlineExceeded { .. } => ErrorCode::BackendTimeout,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the taxonomy kind reported to the orchestrator
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadTaskSpecification { .. } | Error::TemplateDecode(_) => {
                ErrorKind::BadTaskSpecification
            }
            Error::ResourceManager { .. } => ErrorKind::ResourceManagerFailure,
            Error::CacheFailed { .. } | Error::CacheFull { .. } => ErrorKind::CacheFailed,
            Error::Downstream { .. } => ErrorKind::DownstreamSystemError,
            _ => ErrorKind::RuntimeFailure,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ResourceManager { .. }
                | Error::CacheFailed { .. }
                | Error::CacheFull { .. }
                | Error::BackendRequest { .. }
                | Error::Http(_)
                | Error::Cancelled { .. }
                | Error::DeadlineExceeded { .. }
                | Error::Io(_)
                | Error::IoRead { .. }
                | Error::IoWrite { .. }
        )
    }

    /// Check if the error is fatal (the process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::PluginRegistration { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Whether this error came from a cancelled or expired call context
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. } | Error::DeadlineExceeded { .. })
    }

    /// Whether this error was raised locally before any backend call,
    /// while reading the template, inputs or secrets
    pub fn is_preparation_failure(&self) -> bool {
        matches!(
            self,
            Error::BadTaskSpecification { .. }
                | Error::TemplateDecode(_)
                | Error::SecretNotFound { .. }
                | Error::Runtime(_)
        )
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'remote-exec config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'remote-exec config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::BadTaskSpecification { .. } | Error::TemplateDecode(_) => Some(
                "The task template is malformed. Re-register the task with a supported SDK version."
            ),
            Error::ResourceManager { .. } => Some(
                "The admission allocator is unavailable. The task will be retried on the next tick."
            ),
            Error::CacheFull { .. } => Some(
                "Raise 'cache.max_size' in the configuration or lower the number of in-flight tasks."
            ),
            Error::SecretNotFound { .. } => Some(
                "Set the secret in the environment, e.g. REMOTE_EXEC_SECRET_<KEY>."
            ),
            Error::PluginNotFound { .. } => Some(
                "Register a plugin for this task type or mark one plugin as the default."
            ),
            Error::PluginRegistration { .. } => Some(
                "Plugin ids must be unique and at most one plugin may be the default."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}/{}] {}", self.code().as_str(), self.kind(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a bad task specification error
    pub fn bad_task_spec(message: impl Into<String>) -> Self {
        Error::BadTaskSpecification {
            message: message.into(),
        }
    }

    /// Create a resource manager failure
    pub fn resource_manager(token_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ResourceManager {
            token_id: token_id.into(),
            message: message.into(),
        }
    }

    /// Create a cache failure
    pub fn cache_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::CacheFailed {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a backend request failure
    pub fn backend(message: impl Into<String>) -> Self {
        Error::BackendRequest {
            message: message.into(),
            status: None,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }

    /// Re-tag any error as a resource manager failure, keeping its message
    pub fn into_resource_manager(self, token_id: &str) -> Self {
        match self {
            e @ Error::ResourceManager { .. } => e,
            e if e.is_cancellation() => e,
            e => Error::resource_manager(token_id, e.to_string()),
        }
    }

    /// Re-tag any error as a cache failure, keeping its message
    pub fn into_cache_failure(self, key: &str) -> Self {
        match self {
            e @ (Error::CacheFailed { .. } | Error::CacheFull { .. }) => e,
            e => Error::cache_failed(key, e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
