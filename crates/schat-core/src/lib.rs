//! schat client orchestrator
//!
//! Drives an interactive peer-to-peer chat over a secure, session-oriented
//! datagram engine: the reactor thread pool, the per-peer session state
//! machine fed by engine callbacks, the operator command interpreter and
//! shutdown coordination. The engine itself is reached only through the
//! `engine` traits.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod client;
pub mod command;
pub mod config;
pub mod console;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod input;
pub mod reactor;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod signals;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::ChatClient;
pub use command::{interpret, CommandInterpreter, Dispatched, PendingCommand, Resolver, SystemResolver};
pub use config::{ClientConfig, InputMode, PolicyConfig};
pub use console::Console;
pub use engine::{ChannelEvents, GreetOutcome, SecureChannel, SendResults};
pub use errors::{IgnoreReason, Ignored, OperationError, OperationResult, Outcome, Result, SchatError, TransitionError};
pub use handlers::ChatHandlers;
pub use input::{InputCloser, LineReader, ThreadedReader};
pub use reactor::{Reactor, ReactorPool};
pub use registry::SessionRegistry;
pub use session::{Effect, HelloDirection, PeerSession, SessionEvent, SessionState, StateTransition};
pub use shutdown::Shutdown;
pub use signals::listen_for_signals;
pub use types::{AlgorithmInfo, Certificate, ChannelNumber, CipherAlgorithm, DigestAlgorithm, Endpoint, CHANNEL_NUMBER_0};
