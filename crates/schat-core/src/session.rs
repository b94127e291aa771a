//! Peer Session State Machine
//!
//! Tracks the handshake progress with one remote endpoint. Every protocol
//! callback becomes a `SessionEvent`; `PeerSession::dispatch` applies it and
//! reports the follow-up operations the handlers must post.

use core::fmt;

use smallvec::{smallvec, SmallVec};

use crate::errors::TransitionError;
use crate::types::{AlgorithmInfo, Endpoint};

// ----------------------------------------------------------------------------
// Session States
// ----------------------------------------------------------------------------

/// Lifecycle position of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Referenced but nothing exchanged yet
    #[default]
    Unknown,
    /// HELLO sent or received
    HandshakeInitiated,
    /// Peer certificate received
    PresentationReceived,
    /// Peer asked us for a session
    SessionRequested,
    /// Encrypted session usable
    Established,
    /// Session negotiation failed
    Failed,
    /// Established session went away
    Lost,
}

impl SessionState {
    /// State name for logging/audit
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unknown => "Unknown",
            SessionState::HandshakeInitiated => "HandshakeInitiated",
            SessionState::PresentationReceived => "PresentationReceived",
            SessionState::SessionRequested => "SessionRequested",
            SessionState::Established => "Established",
            SessionState::Failed => "Failed",
            SessionState::Lost => "Lost",
        }
    }

    /// A presentation has been seen and not invalidated since
    pub fn has_presentation(&self) -> bool {
        matches!(
            self,
            SessionState::PresentationReceived | SessionState::SessionRequested | SessionState::Established
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// Which side opened the greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloDirection {
    /// Peer greeted us
    Inbound,
    /// Our greeting was answered
    Outbound,
}

/// Protocol occurrence concerning one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Hello { direction: HelloDirection },
    GreetFailed,
    Presentation { is_new: bool },
    SessionRequest,
    SessionProposal,
    SessionFailed {
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    },
    SessionEstablished {
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    },
    SessionLost,
}

impl SessionEvent {
    /// Event name for logging/audit
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Hello {
                direction: HelloDirection::Inbound,
            } => "Hello(inbound)",
            SessionEvent::Hello {
                direction: HelloDirection::Outbound,
            } => "Hello(outbound)",
            SessionEvent::GreetFailed => "GreetFailed",
            SessionEvent::Presentation { .. } => "Presentation",
            SessionEvent::SessionRequest => "SessionRequest",
            SessionEvent::SessionProposal => "SessionProposal",
            SessionEvent::SessionFailed { .. } => "SessionFailed",
            SessionEvent::SessionEstablished { .. } => "SessionEstablished",
            SessionEvent::SessionLost => "SessionLost",
        }
    }
}

// ----------------------------------------------------------------------------
// Transition Results
// ----------------------------------------------------------------------------

/// Follow-up channel operation requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Send our presentation to the peer
    IntroduceTo(Endpoint),
    /// Ask the peer for an encrypted session
    RequestSession(Endpoint),
}

/// Audit trail entry for one applied event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub endpoint: Endpoint,
    pub from_state: SessionState,
    pub to_state: SessionState,
    pub event: &'static str,
    /// Presentation arrived before we observed any HELLO
    pub implied_hello: bool,
    pub effects_count: usize,
}

/// Result of a successful dispatch
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    /// Operations to post as a result of the transition
    pub effects: SmallVec<[Effect; 1]>,
    pub audit: AuditEntry,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

// ----------------------------------------------------------------------------
// Peer Session
// ----------------------------------------------------------------------------

/// Handshake and session bookkeeping for one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    pub endpoint: Endpoint,
    pub state: SessionState,
    /// Engine-supplied flag from the last failed/established report
    pub is_new_session: bool,
    pub local_algorithms: Option<AlgorithmInfo>,
    pub remote_algorithms: Option<AlgorithmInfo>,
    /// Registry tick of the last dispatch
    pub last_touched: u64,
}

impl PeerSession {
    /// Fresh session in the `Unknown` state
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: SessionState::Unknown,
            is_new_session: false,
            local_algorithms: None,
            remote_algorithms: None,
            last_touched: 0,
        }
    }

    /// Apply an event in place.
    ///
    /// A rejected event leaves the session untouched.
    pub fn dispatch(&mut self, event: SessionEvent) -> Result<StateTransition, TransitionError> {
        use SessionState::*;

        let endpoint = self.endpoint;
        let from = self.state;
        let event_name = event.name();
        let mut implied_hello = false;

        let (to, effects): (SessionState, SmallVec<[Effect; 1]>) = match (from, event) {
            // HELLO in either direction starts (or restarts) the handshake
            (Unknown | Failed | Lost, SessionEvent::Hello { .. }) => {
                (HandshakeInitiated, smallvec![Effect::IntroduceTo(endpoint)])
            }
            (state, SessionEvent::Hello { .. }) => (state, smallvec![Effect::IntroduceTo(endpoint)]),

            (state, SessionEvent::GreetFailed) => (state, SmallVec::new()),

            // Presentation may overtake the HELLO response
            (HandshakeInitiated, SessionEvent::Presentation { .. }) => {
                (PresentationReceived, smallvec![Effect::RequestSession(endpoint)])
            }
            (Unknown | Failed | Lost, SessionEvent::Presentation { .. }) => {
                implied_hello = true;
                (PresentationReceived, smallvec![Effect::RequestSession(endpoint)])
            }
            (state, SessionEvent::Presentation { .. }) => (state, smallvec![Effect::RequestSession(endpoint)]),

            (PresentationReceived, SessionEvent::SessionRequest) => (SessionRequested, SmallVec::new()),
            (state, SessionEvent::SessionRequest) => (state, SmallVec::new()),

            (state, SessionEvent::SessionProposal) => (state, SmallVec::new()),

            (_, SessionEvent::SessionFailed { is_new, local, remote }) => {
                self.record_algorithms(is_new, local, remote);
                (Failed, SmallVec::new())
            }

            (PresentationReceived | SessionRequested | Established, SessionEvent::SessionEstablished { is_new, local, remote }) => {
                self.record_algorithms(is_new, local, remote);
                (Established, SmallVec::new())
            }

            (Established, SessionEvent::SessionLost) => (Lost, SmallVec::new()),

            (from, SessionEvent::SessionEstablished { .. } | SessionEvent::SessionLost) => {
                return Err(TransitionError::InvalidTransition {
                    endpoint,
                    from,
                    event: event_name,
                });
            }
        };

        self.state = to;

        let audit = AuditEntry {
            endpoint,
            from_state: from,
            to_state: to,
            event: event_name,
            implied_hello,
            effects_count: effects.len(),
        };

        Ok(StateTransition {
            from,
            to,
            effects,
            audit,
        })
    }

    fn record_algorithms(&mut self, is_new: bool, local: AlgorithmInfo, remote: AlgorithmInfo) {
        self.is_new_session = is_new;
        self.local_algorithms = Some(local);
        self.remote_algorithms = Some(remote);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
