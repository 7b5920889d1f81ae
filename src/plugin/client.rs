//! Remote query service client
//!
//! `QueryClient` is the narrow interface the query plugin needs from the
//! service: submit, look up, cancel. `HttpQueryClient` talks to the REST
//! API with reqwest and retries transient failures with exponential
//! backoff.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::QueryServiceSettings;
use crate::error::{Error, Result};
use crate::version::build_info;

/// Header carrying the API token
pub const AUTH_HEADER: &str = "X-AUTH-TOKEN";

// ─────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────

/// Lifecycle status of a command at the query service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Waiting,
    Running,
    Done,
    Error,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Error | CommandStatus::Cancelled)
    }
}

/// A query submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Deterministic name; the service returns the existing command when a
    /// command with this name was already submitted
    pub name: String,

    /// Query text
    pub query: String,

    /// Cluster label the query runs on
    pub label: String,

    /// Free-form tags shown in the service console
    #[serde(default)]
    pub tags: Vec<String>,

    /// Server-side timeout, 0 for none
    #[serde(default)]
    pub timeout: u32,
}

/// A command as reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDetails {
    /// Command id
    pub id: String,

    /// Current status
    pub status: CommandStatus,

    /// Console link for the command
    #[serde(default)]
    pub uri: String,
}

// ─────────────────────────────────────────────────────────────────
// QueryClient Trait
// ─────────────────────────────────────────────────────────────────

/// Operations of the remote query service
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Submit a query; resubmitting the same name returns the same command
    async fn submit(&self, request: &QueryRequest, api_key: &str) -> Result<CommandDetails>;

    /// Current state of a command
    async fn command(&self, command_id: &str, api_key: &str) -> Result<CommandDetails>;

    /// Cancel a command; cancelling an unknown or finished command succeeds
    async fn kill(&self, command_id: &str, api_key: &str) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// HTTP Client
// ─────────────────────────────────────────────────────────────────

/// REST client for the query service
pub struct HttpQueryClient {
    settings: QueryServiceSettings,
    client: Client,
}

impl HttpQueryClient {
    pub fn new(settings: QueryServiceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(build_info().user_agent())
            .build()?;

        debug!(base_url = %settings.base_url, "Query service client created");

        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str, api_key: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(AUTH_HEADER, api_key)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn submit_request(&self, request: &QueryRequest, api_key: &str) -> Result<reqwest::Request> {
        Ok(self.request(Method::POST, "commands", api_key).json(request).build()?)
    }

    fn status_request(&self, command_id: &str, api_key: &str) -> Result<reqwest::Request> {
        Ok(self
            .request(Method::GET, &format!("commands/{}", command_id), api_key)
            .build()?)
    }

    fn kill_request(&self, command_id: &str, api_key: &str) -> Result<reqwest::Request> {
        Ok(self
            .request(Method::PUT, &format!("commands/{}", command_id), api_key)
            .json(&serde_json::json!({ "status": "kill" }))
            .build()?)
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.settings.initial_backoff_ms),
            max_interval: Duration::from_secs(self.settings.timeout_secs.max(1)),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Send a request, retrying connection errors, 429 and 5xx responses
    ///
    /// Returns `None` for a 404 response.
    async fn send(&self, build: impl Fn() -> Result<reqwest::Request>) -> Result<Option<reqwest::Response>> {
        let attempts = AtomicU32::new(0);
        let max_retries = self.settings.max_retries;

        backoff::future::retry(self.backoff_policy(), || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            let give_up = attempt >= max_retries;
            let retry_or_fail = |e: Error| {
                if give_up {
                    backoff::Error::permanent(e)
                } else {
                    warn!(attempt, error = %e, "Retryable query service error");
                    backoff::Error::transient(e)
                }
            };

            let request = build().map_err(backoff::Error::permanent)?;
            let response = match self.client.execute(request).await {
                Ok(response) => response,
                Err(e) if e.is_timeout() || e.is_connect() => return Err(retry_or_fail(e.into())),
                Err(e) => return Err(backoff::Error::permanent(e.into())),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(Some(response));
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }

            let body = response.text().await.unwrap_or_default();
            let err = Error::BackendRequest {
                message: format!("query service returned {}: {}", status, body),
                status: Some(status.as_u16()),
            };
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(retry_or_fail(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn submit(&self, request: &QueryRequest, api_key: &str) -> Result<CommandDetails> {
        let response = self
            .send(|| self.submit_request(request, api_key))
            .await?
            .ok_or_else(|| Error::backend("query service returned 404 for command submission"))?;
        Ok(response.json().await?)
    }

    async fn command(&self, command_id: &str, api_key: &str) -> Result<CommandDetails> {
        let response = self
            .send(|| self.status_request(command_id, api_key))
            .await?
            .ok_or_else(|| Error::BackendRequest {
                message: format!("command {} not found", command_id),
                status: Some(404),
            })?;
        Ok(response.json().await?)
    }

    async fn kill(&self, command_id: &str, api_key: &str) -> Result<()> {
        if self.send(|| self.kill_request(command_id, api_key)).await?.is_none() {
            debug!(command_id, "Command already absent, nothing to cancel");
        }
        Ok(())
    }
}
