//! Secret lookup for plugins
//!
//! Plugins receive a `SecretManager` at setup and per invocation. Lookup
//! failures are runtime failures, never task specification errors.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Retrieves named secrets
#[async_trait]
pub trait SecretManager: Send + Sync {
    async fn get(&self, key: &str) -> Result<String>;
}

/// Reads secrets from environment variables named `<prefix><KEY>`
///
/// The key is upper-cased and dashes/dots become underscores, so the key
/// `query-token` maps to `REMOTE_EXEC_SECRET_QUERY_TOKEN` with the default
/// prefix.
#[derive(Debug, Clone)]
pub struct EnvSecretManager {
    prefix: String,
}

impl EnvSecretManager {
    pub const DEFAULT_PREFIX: &'static str = "REMOTE_EXEC_SECRET_";

    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `key`
    pub fn var_name(&self, key: &str) -> String {
        let normalized: String = key
            .chars()
            .map(|c| match c {
                '-' | '.' | '/' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl Default for EnvSecretManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretManager for EnvSecretManager {
    async fn get(&self, key: &str) -> Result<String> {
        let var = self.var_name(key);
        debug!(key = %key, var = %var, "Looking up secret");
        std::env::var(&var).map_err(|_| Error::SecretNotFound {
            key: key.to_string(),
        })
    }
}

/// Fixed set of secrets, for tests and the simulated service
#[derive(Debug, Clone, Default)]
pub struct StaticSecretManager {
    secrets: HashMap<String, String>,
}

impl StaticSecretManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretManager for StaticSecretManager {
    async fn get(&self, key: &str) -> Result<String> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SecretNotFound {
                key: key.to_string(),
            })
    }
}
