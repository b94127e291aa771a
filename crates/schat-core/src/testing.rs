//! Test doubles for the engine and the resolver

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;

use crate::command::Resolver;
use crate::engine::{GreetOutcome, SecureChannel, SendResults};
use crate::errors::{OperationError, OperationResult, SchatError};
use crate::types::{ChannelNumber, Endpoint};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Recording Channel
// ----------------------------------------------------------------------------

/// One operation received by the recording channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Greet(Endpoint),
    IntroduceTo(Endpoint),
    RequestSession(Endpoint),
    SendDataToAll { channel: ChannelNumber, data: Vec<u8> },
}

/// In-memory `SecureChannel` that records every call
pub struct RecordingChannel {
    calls: Mutex<Vec<ChannelCall>>,
    peers: Mutex<Vec<Endpoint>>,
    greet_result: Mutex<OperationResult>,
    greet_elapsed: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            greet_result: Mutex::new(Ok(())),
            greet_elapsed: Mutex::new(Duration::from_millis(1)),
            send_delay: Mutex::new(Duration::ZERO),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Peers that `send_data_to_all` reports results for
    pub fn set_peers(&self, peers: Vec<Endpoint>) {
        *lock(&self.peers) = peers;
    }

    pub fn set_greet_result(&self, result: OperationResult, elapsed: Duration) {
        *lock(&self.greet_result) = result;
        *lock(&self.greet_elapsed) = elapsed;
    }

    /// Make every broadcast take `delay` before completing
    pub fn set_send_delay(&self, delay: Duration) {
        *lock(&self.send_delay) = delay;
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        lock(&self.calls).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: ChannelCall) {
        lock(&self.calls).push(call);
    }

    fn status(&self) -> OperationResult {
        if self.is_closed() {
            Err(OperationError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureChannel for RecordingChannel {
    async fn greet(&self, target: Endpoint) -> GreetOutcome {
        self.record(ChannelCall::Greet(target));
        let result = self.status().and_then(|_| lock(&self.greet_result).clone());
        GreetOutcome {
            result,
            elapsed: *lock(&self.greet_elapsed),
        }
    }

    async fn introduce_to(&self, target: Endpoint) -> OperationResult {
        self.record(ChannelCall::IntroduceTo(target));
        self.status()
    }

    async fn request_session(&self, target: Endpoint) -> OperationResult {
        self.record(ChannelCall::RequestSession(target));
        self.status()
    }

    async fn send_data_to_all(&self, channel: ChannelNumber, data: Vec<u8>) -> SendResults {
        self.record(ChannelCall::SendDataToAll { channel, data });
        let delay = *lock(&self.send_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let status = self.status();
        lock(&self.peers)
            .iter()
            .map(|peer| (*peer, status.clone()))
            .collect()
    }

    fn close(&self) -> bool {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Static Resolver
// ----------------------------------------------------------------------------

/// Resolver answering from a fixed table
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<(String, String), Endpoint>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, port: &str, endpoint: Endpoint) -> Self {
        self.entries.insert((host.to_string(), port.to_string()), endpoint);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, port: &str) -> Result<Endpoint, SchatError> {
        self.entries
            .get(&(host.to_string(), port.to_string()))
            .copied()
            .ok_or_else(|| SchatError::Resolve(format!("Host not found: {}:{}", host, port)))
    }
}
