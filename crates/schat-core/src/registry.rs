//! Peer Session Registry
//!
//! One `PeerSession` per endpoint behind a single lock. Sessions are created
//! in the `Unknown` state on first reference.

use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use tracing::debug;

use crate::errors::TransitionError;
use crate::session::{PeerSession, SessionEvent, SessionState, StateTransition};
use crate::types::Endpoint;

/// Default upper bound on tracked peers
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

struct Inner {
    sessions: HashMap<Endpoint, PeerSession>,
    tick: u64,
}

/// Thread-safe map from endpoint to session state
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    /// Registry holding at most `max_sessions` peers (`None` = unbounded)
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                tick: 0,
            }),
            max_sessions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an event to the session for `endpoint`, creating it if needed.
    ///
    /// The read-modify-write happens under one lock acquisition.
    pub fn dispatch(&self, endpoint: Endpoint, event: SessionEvent) -> Result<StateTransition, TransitionError> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.sessions.contains_key(&endpoint) {
            if let Some(max) = self.max_sessions {
                if inner.sessions.len() >= max {
                    evict_one(&mut inner.sessions);
                }
            }
        }

        let session = inner
            .sessions
            .entry(endpoint)
            .or_insert_with(|| PeerSession::new(endpoint));
        session.last_touched = tick;

        let result = session.dispatch(event);
        if let Ok(transition) = &result {
            if transition.changed() {
                debug!(
                    "{}: {} -> {} on {}",
                    endpoint, transition.from, transition.to, transition.audit.event
                );
            }
        }
        result
    }

    /// Copy of the session for `endpoint`
    pub fn get(&self, endpoint: &Endpoint) -> Option<PeerSession> {
        self.lock().sessions.get(endpoint).cloned()
    }

    /// Current state for `endpoint`, `Unknown` when never referenced
    pub fn state_of(&self, endpoint: &Endpoint) -> SessionState {
        self.lock()
            .sessions
            .get(endpoint)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// All sessions ordered by endpoint
    pub fn snapshot(&self) -> Vec<PeerSession> {
        let mut sessions: Vec<PeerSession> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.endpoint);
        sessions
    }

    /// Endpoints with an established session, ordered
    pub fn established(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Established)
            .map(|s| s.endpoint)
            .collect();
        endpoints.sort();
        endpoints
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_SESSIONS))
    }
}

/// Drop the stalest session, sparing established ones when possible
fn evict_one(sessions: &mut HashMap<Endpoint, PeerSession>) {
    let victim = sessions
        .values()
        .filter(|s| s.state != SessionState::Established)
        .min_by_key(|s| s.last_touched)
        .or_else(|| sessions.values().min_by_key(|s| s.last_touched))
        .map(|s| (s.endpoint, s.state));

    if let Some((endpoint, state)) = victim {
        sessions.remove(&endpoint);
        debug!("Evicted session {} in state {}", endpoint, state);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HelloDirection;
    use crate::types::{AlgorithmInfo, CipherAlgorithm, DigestAlgorithm};

    fn create_test_endpoint(port: u16) -> Endpoint {
        format!("10.0.0.2:{}", port).parse().unwrap()
    }

    fn establish(registry: &SessionRegistry, endpoint: Endpoint) {
        let algorithms = AlgorithmInfo::new(CipherAlgorithm::Aes256Gcm, DigestAlgorithm::Sha512);
        registry
            .dispatch(endpoint, SessionEvent::Presentation { is_new: true })
            .unwrap();
        registry
            .dispatch(
                endpoint,
                SessionEvent::SessionEstablished {
                    is_new: true,
                    local: algorithms,
                    remote: algorithms,
                },
            )
            .unwrap();
    }

    #[test]
    fn test_first_reference_creates_session() {
        let registry = SessionRegistry::default();
        let endpoint = create_test_endpoint(5000);
        assert!(registry.is_empty());
        assert_eq!(registry.state_of(&endpoint), SessionState::Unknown);

        registry
            .dispatch(
                endpoint,
                SessionEvent::Hello {
                    direction: HelloDirection::Inbound,
                },
            )
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state_of(&endpoint), SessionState::HandshakeInitiated);
    }

    #[test]
    fn test_rejected_event_leaves_entry_intact() {
        let registry = SessionRegistry::default();
        let endpoint = create_test_endpoint(5000);
        assert!(registry.dispatch(endpoint, SessionEvent::SessionLost).is_err());
        assert_eq!(registry.get(&endpoint).map(|s| s.state), Some(SessionState::Unknown));
    }

    #[test]
    fn test_snapshot_and_established_are_ordered() {
        let registry = SessionRegistry::default();
        for port in [5003, 5001, 5002] {
            establish(&registry, create_test_endpoint(port));
        }
        registry
            .dispatch(create_test_endpoint(5000), SessionEvent::GreetFailed)
            .unwrap();

        let ports: Vec<u16> = registry.snapshot().iter().map(|s| s.endpoint.port()).collect();
        assert_eq!(ports, vec![5000, 5001, 5002, 5003]);

        let established: Vec<u16> = registry.established().iter().map(|e| e.port()).collect();
        assert_eq!(established, vec![5001, 5002, 5003]);
    }

    #[test]
    fn test_eviction_spares_established_sessions() {
        let registry = SessionRegistry::new(Some(2));
        let a = create_test_endpoint(1);
        let b = create_test_endpoint(2);
        let c = create_test_endpoint(3);

        establish(&registry, a);
        registry.dispatch(b, SessionEvent::GreetFailed).unwrap();
        registry.dispatch(c, SessionEvent::GreetFailed).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&a).is_some());
        assert!(registry.get(&b).is_none());
        assert!(registry.get(&c).is_some());
    }

    #[test]
    fn test_eviction_falls_back_to_oldest() {
        let registry = SessionRegistry::new(Some(2));
        let a = create_test_endpoint(1);
        let b = create_test_endpoint(2);
        establish(&registry, a);
        establish(&registry, b);

        let c = create_test_endpoint(3);
        registry.dispatch(c, SessionEvent::GreetFailed).unwrap();
        assert!(registry.get(&a).is_none());
        assert_eq!(registry.established(), vec![b]);
    }

    #[test]
    fn test_unbounded_registry() {
        let registry = SessionRegistry::new(None);
        for port in 0..64 {
            registry
                .dispatch(create_test_endpoint(port), SessionEvent::GreetFailed)
                .unwrap();
        }
        assert_eq!(registry.len(), 64);
    }
}
