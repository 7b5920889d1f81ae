//! Simulated query service
//!
//! An in-process `QueryClient` with deterministic command ids, scripted
//! progress and failure injection. Backs the `run` subcommand and the
//! test suite.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};

use super::client::{CommandDetails, CommandStatus, QueryClient, QueryRequest};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Behavior of the simulated service
#[derive(Debug, Clone)]
pub struct MockQueryConfig {
    /// Number of the first command id handed out (ids are `Q<n>`)
    pub first_command_id: u64,

    /// Status lookups a command stays `waiting`/`running` before finishing
    pub polls_until_done: u32,

    /// Status a command finishes with
    pub final_status: CommandStatus,

    /// Simulated latency per call
    pub latency: Duration,

    /// Base of the console links returned with each command
    pub console_url: String,
}

impl Default for MockQueryConfig {
    fn default() -> Self {
        Self {
            first_command_id: 1,
            polls_until_done: 2,
            final_status: CommandStatus::Done,
            latency: Duration::ZERO,
            console_url: "https://console.query-service.example.com/commands".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct MockCommand {
    details: CommandDetails,
    polls: u32,
}

/// Track method call counts for verification
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub submit: u32,
    pub command: u32,
    pub kill: u32,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    by_name: HashMap<String, String>,
    commands: HashMap<String, MockCommand>,
    failing_submits: u32,
    fail_lookups: bool,
    fail_kills: bool,
    counts: CallCounts,
}

// ─────────────────────────────────────────────────────────────────
// Mock Client
// ─────────────────────────────────────────────────────────────────

/// Deterministic in-process query service
pub struct MockQueryClient {
    config: MockQueryConfig,
    state: RwLock<MockState>,
}

impl MockQueryClient {
    pub fn new() -> Self {
        Self::with_config(MockQueryConfig::default())
    }

    pub fn with_config(config: MockQueryConfig) -> Self {
        let state = MockState {
            next_id: config.first_command_id,
            ..Default::default()
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    /// Make the next `n` submissions fail with a 503
    pub fn fail_next_submits(&self, n: u32) {
        self.state.write().failing_submits = n;
    }

    /// Make every status lookup fail until turned off
    pub fn set_fail_lookups(&self, fail: bool) {
        self.state.write().fail_lookups = fail;
    }

    /// Make every kill fail until turned off
    pub fn set_fail_kills(&self, fail: bool) {
        self.state.write().fail_kills = fail;
    }

    /// Force the status of a command
    pub fn set_status(&self, command_id: &str, status: CommandStatus) {
        if let Some(cmd) = self.state.write().commands.get_mut(command_id) {
            cmd.details.status = status;
        }
    }

    /// Current status of a command, without counting as a lookup
    pub fn peek(&self, command_id: &str) -> Option<CommandStatus> {
        self.state.read().commands.get(command_id).map(|c| c.details.status)
    }

    /// Command id created for a deterministic name
    pub fn command_id_for(&self, name: &str) -> Option<String> {
        self.state.read().by_name.get(name).cloned()
    }

    pub fn call_counts(&self) -> CallCounts {
        self.state.read().counts
    }

    /// Number of distinct commands created
    pub fn command_count(&self) -> usize {
        self.state.read().commands.len()
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn unavailable(what: &str) -> Error {
        Error::BackendRequest {
            message: format!("simulated service unavailable during {}", what),
            status: Some(503),
        }
    }
}

impl Default for MockQueryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryClient for MockQueryClient {
    async fn submit(&self, request: &QueryRequest, api_key: &str) -> Result<CommandDetails> {
        self.simulate_latency().await;
        if api_key.is_empty() {
            return Err(Error::BackendRequest {
                message: "missing API token".to_string(),
                status: Some(401),
            });
        }

        let mut state = self.state.write();
        state.counts.submit += 1;

        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(Self::unavailable("submit"));
        }

        if let Some(id) = state.by_name.get(&request.name).cloned() {
            if let Some(existing) = state.commands.get(&id) {
                return Ok(existing.details.clone());
            }
        }

        let id = format!("Q{}", state.next_id);
        state.next_id += 1;
        let details = CommandDetails {
            id: id.clone(),
            status: CommandStatus::Waiting,
            uri: format!("{}/{}", self.config.console_url, id),
        };
        state.by_name.insert(request.name.clone(), id.clone());
        state.commands.insert(
            id,
            MockCommand {
                details: details.clone(),
                polls: 0,
            },
        );
        Ok(details)
    }

    async fn command(&self, command_id: &str, _api_key: &str) -> Result<CommandDetails> {
        self.simulate_latency().await;

        let mut state = self.state.write();
        state.counts.command += 1;
        if state.fail_lookups {
            return Err(Self::unavailable("status lookup"));
        }

        let polls_until_done = self.config.polls_until_done;
        let final_status = self.config.final_status;
        let cmd = state.commands.get_mut(command_id).ok_or_else(|| Error::BackendRequest {
            message: format!("command {} not found", command_id),
            status: Some(404),
        })?;

        if !cmd.details.status.is_terminal() {
            cmd.polls += 1;
            cmd.details.status = if cmd.polls > polls_until_done {
                final_status
            } else {
                CommandStatus::Running
            };
        }
        Ok(cmd.details.clone())
    }

    async fn kill(&self, command_id: &str, _api_key: &str) -> Result<()> {
        self.simulate_latency().await;

        let mut state = self.state.write();
        state.counts.kill += 1;
        if state.fail_kills {
            return Err(Self::unavailable("kill"));
        }
        if let Some(cmd) = state.commands.get_mut(command_id) {
            if !cmd.details.status.is_terminal() {
                cmd.details.status = CommandStatus::Cancelled;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> QueryRequest {
        QueryRequest {
            name: name.to_string(),
            query: "select 1".to_string(),
            label: "default".to_string(),
            tags: vec![],
            timeout: 0,
        }
    }

    #[tokio::test]
    async fn test_submit_is_idempotent_by_name() {
        let client = MockQueryClient::with_config(MockQueryConfig {
            first_command_id: 123,
            ..Default::default()
        });

        let first = client.submit(&request("rx-a"), "tok").await.unwrap();
        let again = client.submit(&request("rx-a"), "tok").await.unwrap();
        let other = client.submit(&request("rx-b"), "tok").await.unwrap();

        assert_eq!(first.id, "Q123");
        assert_eq!(again.id, "Q123");
        assert_eq!(other.id, "Q124");
        assert_eq!(client.command_count(), 2);
        assert_eq!(client.command_id_for("rx-a").as_deref(), Some("Q123"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let client = MockQueryClient::new();
        client.fail_next_submits(2);

        assert!(client.submit(&request("a"), "tok").await.is_err());
        assert!(client.submit(&request("a"), "tok").await.is_err());
        assert!(client.submit(&request("a"), "tok").await.is_ok());
        assert_eq!(client.call_counts().submit, 3);
    }

    #[tokio::test]
    async fn test_progress_to_final_status() {
        let client = MockQueryClient::with_config(MockQueryConfig {
            polls_until_done: 1,
            final_status: CommandStatus::Error,
            ..Default::default()
        });
        let cmd = client.submit(&request("a"), "tok").await.unwrap();

        assert_eq!(client.command(&cmd.id, "tok").await.unwrap().status, CommandStatus::Running);
        assert_eq!(client.command(&cmd.id, "tok").await.unwrap().status, CommandStatus::Error);
        assert_eq!(client.command(&cmd.id, "tok").await.unwrap().status, CommandStatus::Error);
    }

    #[tokio::test]
    async fn test_kill_unknown_is_noop() {
        let client = MockQueryClient::new();
        client.kill("Q999", "tok").await.unwrap();

        let cmd = client.submit(&request("a"), "tok").await.unwrap();
        client.kill(&cmd.id, "tok").await.unwrap();
        assert_eq!(client.peek(&cmd.id), Some(CommandStatus::Cancelled));
        assert_eq!(client.call_counts().kill, 2);
    }

    #[tokio::test]
    async fn test_failing_kill_leaves_command_running() {
        let client = MockQueryClient::new();
        let cmd = client.submit(&request("a"), "tok").await.unwrap();

        client.set_fail_kills(true);
        let err = client.kill(&cmd.id, "tok").await.unwrap_err();
        assert!(matches!(err, Error::BackendRequest { status: Some(503), .. }));
        assert_eq!(client.peek(&cmd.id), Some(CommandStatus::Waiting));

        client.set_fail_kills(false);
        client.kill(&cmd.id, "tok").await.unwrap();
        assert_eq!(client.peek(&cmd.id), Some(CommandStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let client = MockQueryClient::new();
        let err = client.submit(&request("a"), "").await.unwrap_err();
        assert!(matches!(err, Error::BackendRequest { status: Some(401), .. }));
    }
}
