//! Error types for the schat client
//!
//! `SchatError` covers startup and runtime failures of the orchestrator.
//! Per-operation results reported by the secure channel use `OperationError`,
//! rejected state machine events use `TransitionError`, and inputs that are
//! deliberately dropped are reported as `Ignored`.

use core::fmt;

use crate::session::SessionState;
use crate::types::Endpoint;

// ----------------------------------------------------------------------------
// Orchestrator Errors
// ----------------------------------------------------------------------------

/// Main error type for the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum SchatError {
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resolution error: {0}")]
    Resolve(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for orchestrator operations
pub type Result<T> = core::result::Result<T, SchatError>;

// ----------------------------------------------------------------------------
// Operation Errors
// ----------------------------------------------------------------------------

/// Failure of one asynchronous channel operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("Operation timed out")]
    Timeout,
    #[error("Channel closed")]
    Closed,
    #[error("No presentation received from peer")]
    NoPresentation,
    #[error("No established session with peer")]
    NoSession,
    #[error("Rejected by peer policy")]
    Rejected,
    #[error("Network error: {0}")]
    Io(String),
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        OperationError::Io(err.to_string())
    }
}

/// Result of one asynchronous channel operation
pub type OperationResult = core::result::Result<(), OperationError>;

/// Human-readable outcome, `Success` for `Ok`
pub struct Outcome<'a>(pub &'a OperationResult);

impl fmt::Display for Outcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Ok(()) => f.write_str("Success"),
            Err(err) => write!(f, "{}", err),
        }
    }
}

// ----------------------------------------------------------------------------
// State Machine Errors
// ----------------------------------------------------------------------------

/// Errors that can occur during session state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid transition for {endpoint} from {from} on {event}")]
    InvalidTransition {
        endpoint: Endpoint,
        from: SessionState,
        event: &'static str,
    },
}

// ----------------------------------------------------------------------------
// Deliberately Ignored Input
// ----------------------------------------------------------------------------

/// Why an input produced no effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `!` with nothing after it
    EmptyCommand,
    /// `!<name>` where `<name>` is not a known command
    UnrecognizedCommand(String),
    /// Known command with too few arguments
    MissingArguments(String),
    /// Received payload is not valid UTF-8
    UndecodablePayload,
}

/// An outcome that is discarded on purpose. Carries no output and no side effects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ignored: {0:?}")]
pub struct Ignored(pub IgnoreReason);

impl Ignored {
    pub fn reason(&self) -> &IgnoreReason {
        &self.0
    }
}
