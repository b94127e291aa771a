//! Secure channel abstraction
//!
//! The orchestrator drives a secure datagram engine through `SecureChannel`
//! and is notified of protocol events through `ChannelEvents`. The engine owns
//! the wire format and the cryptography; neither is visible here.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::OperationResult;
use crate::types::{AlgorithmInfo, Certificate, ChannelNumber, CipherAlgorithm, Endpoint};

// ----------------------------------------------------------------------------
// Operation Results
// ----------------------------------------------------------------------------

/// Completion of a greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetOutcome {
    pub result: OperationResult,
    /// Time between sending the HELLO and the outcome
    pub elapsed: Duration,
}

/// Per-peer results of a broadcast, ordered by endpoint
pub type SendResults = BTreeMap<Endpoint, OperationResult>;

// ----------------------------------------------------------------------------
// Engine Operations
// ----------------------------------------------------------------------------

/// Operations the orchestrator issues against the engine.
///
/// Every async operation completes exactly once. After `close` they all
/// complete with `OperationError::Closed`.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    /// Send a HELLO and wait for the response
    async fn greet(&self, target: Endpoint) -> GreetOutcome;

    /// Send our presentation (certificate) to the peer
    async fn introduce_to(&self, target: Endpoint) -> OperationResult;

    /// Ask the peer to open an encrypted session
    async fn request_session(&self, target: Endpoint) -> OperationResult;

    /// Send `data` on `channel` to every peer with an established session
    async fn send_data_to_all(&self, channel: ChannelNumber, data: Vec<u8>) -> SendResults;

    /// Stop the engine. Returns `true` only for the first call.
    fn close(&self) -> bool;

    fn is_closed(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Engine Events
// ----------------------------------------------------------------------------

/// Hooks the engine invokes on its own tasks.
///
/// Implementations must not block beyond short critical sections. Hooks
/// returning `bool` decide whether the engine accepts the request.
pub trait ChannelEvents: Send + Sync {
    fn on_hello(&self, sender: Endpoint, default_accept: bool) -> bool;

    fn on_presentation(&self, sender: Endpoint, certificate: &Certificate, is_new: bool) -> bool;

    fn on_session_request(&self, sender: Endpoint, ciphers: &[CipherAlgorithm], default_accept: bool) -> bool;

    fn on_session(&self, sender: Endpoint, cipher: CipherAlgorithm, default_accept: bool) -> bool;

    fn on_session_failed(&self, host: Endpoint, is_new: bool, local: &AlgorithmInfo, remote: &AlgorithmInfo);

    fn on_session_established(&self, host: Endpoint, is_new: bool, local: &AlgorithmInfo, remote: &AlgorithmInfo);

    fn on_session_lost(&self, host: Endpoint);

    fn on_data(&self, sender: Endpoint, channel: ChannelNumber, data: &[u8]);
}
