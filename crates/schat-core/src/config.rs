//! Orchestrator configuration
//!
//! Plain serde structs; layering and file discovery belong to the binary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchatError};
use crate::registry::DEFAULT_MAX_SESSIONS;

/// Longest accepted input line, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 512;

/// How operator input is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Non-blocking reader on the reactor, closed by shutdown
    #[default]
    Async,
    /// Blocking reader on a dedicated thread
    Thread,
}

/// Client runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Reactor worker count, `None` = available parallelism
    pub threads: Option<usize>,
    pub input_mode: InputMode,
    /// Bound on waiting for in-flight operations at shutdown
    pub shutdown_timeout_ms: u64,
    /// Bound on joining the reactor workers
    pub join_timeout_ms: u64,
    /// Peer session cap, `None` = unbounded
    pub max_sessions: Option<usize>,
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            threads: None,
            input_mode: InputMode::Async,
            shutdown_timeout_ms: 5_000,
            join_timeout_ms: 5_000,
            max_sessions: Some(DEFAULT_MAX_SESSIONS),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(SchatError::Config("client.threads must be at least 1".to_string()));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(SchatError::Config("client.shutdown_timeout_ms must be non-zero".to_string()));
        }
        if self.join_timeout_ms == 0 {
            return Err(SchatError::Config("client.join_timeout_ms must be non-zero".to_string()));
        }
        if self.max_sessions == Some(0) {
            return Err(SchatError::Config("client.max_sessions must be at least 1".to_string()));
        }
        if self.max_line_length == 0 {
            return Err(SchatError::Config("client.max_line_length must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Overrides for the engine's accept decisions. `None` keeps the engine default.
///
/// Presentations are always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub accept_hello: Option<bool>,
    pub accept_session_request: Option<bool>,
    pub accept_session: Option<bool>,
}

impl PolicyConfig {
    pub fn hello(&self, default_accept: bool) -> bool {
        self.accept_hello.unwrap_or(default_accept)
    }

    pub fn session_request(&self, default_accept: bool) -> bool {
        self.accept_session_request.unwrap_or(default_accept)
    }

    pub fn session(&self, default_accept: bool) -> bool {
        self.accept_session.unwrap_or(default_accept)
    }
}
