//! Command interpreter for operator input
//!
//! `interpret` turns one line into a `PendingCommand` without side effects;
//! `CommandInterpreter::dispatch` carries it out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::{IgnoreReason, Ignored, SchatError};
use crate::handlers::ChatHandlers;
use crate::shutdown::Shutdown;
use crate::types::Endpoint;

const COMMAND_PREFIX: char = '!';

// ----------------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------------

/// What one line of input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCommand {
    /// `!connect <host> <port>`
    Connect { host: String, port: String },
    /// Plain text for every peer
    Broadcast { text: String },
    /// `!quit` or `!exit`
    Quit,
    /// Anything else starting with `!`
    Unknown(Ignored),
}

/// Parse one input line
pub fn interpret(line: &str) -> PendingCommand {
    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return PendingCommand::Broadcast { text: line.to_string() };
    };

    let mut tokens = rest.split_whitespace();
    let Some(name) = tokens.next() else {
        return PendingCommand::Unknown(Ignored(IgnoreReason::EmptyCommand));
    };

    match name {
        "connect" => match (tokens.next(), tokens.next()) {
            (Some(host), Some(port)) => PendingCommand::Connect {
                host: host.to_string(),
                port: port.to_string(),
            },
            _ => PendingCommand::Unknown(Ignored(IgnoreReason::MissingArguments(name.to_string()))),
        },
        "quit" | "exit" => PendingCommand::Quit,
        other => PendingCommand::Unknown(Ignored(IgnoreReason::UnrecognizedCommand(other.to_string()))),
    }
}

// ----------------------------------------------------------------------------
// Resolution
// ----------------------------------------------------------------------------

/// Host/port to endpoint lookup
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: &str) -> Result<Endpoint, SchatError>;
}

/// Resolver backed by the system name service
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: &str) -> Result<Endpoint, SchatError> {
        let port: u16 = port
            .parse()
            .map_err(|_| SchatError::Resolve(format!("Invalid port: {}", port)))?;
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| SchatError::Resolve(e.to_string()))?;
        addrs
            .next()
            .map(Endpoint::from)
            .ok_or_else(|| SchatError::Resolve(format!("Host not found: {}", host)))
    }
}

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

/// What a dispatched command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Greeting posted to the endpoint
    Greeting(Endpoint),
    /// Name lookup failed, nothing sent
    ResolutionFailed,
    /// Broadcast posted
    Broadcasting,
    /// Shutdown requested
    Quit,
}

/// Executes operator commands against the engine
pub struct CommandInterpreter {
    handlers: Arc<ChatHandlers>,
    resolver: Arc<dyn Resolver>,
    shutdown: Shutdown,
}

impl CommandInterpreter {
    pub fn new(handlers: Arc<ChatHandlers>, resolver: Arc<dyn Resolver>, shutdown: Shutdown) -> Self {
        Self {
            handlers,
            resolver,
            shutdown,
        }
    }

    pub async fn dispatch(&self, command: PendingCommand) -> Result<Dispatched, Ignored> {
        match command {
            PendingCommand::Connect { host, port } => match self.resolver.resolve(&host, &port).await {
                Ok(endpoint) => {
                    self.handlers.greet(endpoint);
                    self.handlers.console().line(format!("Contacting {}...", endpoint));
                    Ok(Dispatched::Greeting(endpoint))
                }
                Err(err) => {
                    self.handlers
                        .console()
                        .error_line(format!("Unable to resolve the specified host/port: {}", err));
                    Ok(Dispatched::ResolutionFailed)
                }
            },
            PendingCommand::Broadcast { text } => {
                self.handlers.broadcast(text);
                Ok(Dispatched::Broadcasting)
            }
            PendingCommand::Quit => {
                self.shutdown.trigger();
                Ok(Dispatched::Quit)
            }
            PendingCommand::Unknown(ignored) => Err(ignored),
        }
    }

    /// Interpret and dispatch one line, discarding ignored input
    pub async fn handle_line(&self, line: &str) -> Option<Dispatched> {
        match self.dispatch(interpret(line)).await {
            Ok(dispatched) => Some(dispatched),
            Err(ignored) => {
                debug!("Input ignored: {:?}", ignored.reason());
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
