//! Protocol Event Handlers
//!
//! `ChatHandlers` receives engine events, advances the peer session registry,
//! prints what happened and posts the follow-up operations the state machine
//! asks for. It also owns the operator-initiated operations (greet and
//! broadcast) so every engine call and its console report live in one place.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::console::Console;
use crate::engine::{ChannelEvents, SecureChannel, SendResults};
use crate::errors::{IgnoreReason, Ignored, OperationResult, Outcome};
use crate::reactor::Reactor;
use crate::registry::SessionRegistry;
use crate::session::{Effect, HelloDirection, SessionEvent};
use crate::types::{AlgorithmInfo, Certificate, ChannelNumber, CipherAlgorithm, Endpoint, CHANNEL_NUMBER_0};

/// Event hooks and chained operations of the chat client
pub struct ChatHandlers {
    channel: Arc<dyn SecureChannel>,
    registry: Arc<SessionRegistry>,
    console: Arc<Console>,
    reactor: Reactor,
    policy: PolicyConfig,
}

impl ChatHandlers {
    pub fn new(
        channel: Arc<dyn SecureChannel>,
        registry: Arc<SessionRegistry>,
        console: Arc<Console>,
        reactor: Reactor,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            channel,
            registry,
            console,
            reactor,
            policy,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn channel(&self) -> &Arc<dyn SecureChannel> {
        &self.channel
    }

    // ------------------------------------------------------------------------
    // Operator-initiated operations
    // ------------------------------------------------------------------------

    /// Post a greeting; its completion feeds `on_hello_response`
    pub fn greet(self: &Arc<Self>, target: Endpoint) {
        let handlers = self.clone();
        self.reactor.post(async move {
            let outcome = handlers.channel.greet(target).await;
            handlers.on_hello_response(target, outcome.result, outcome.elapsed);
        });
    }

    /// Post `text` to every peer on channel 0 and report each result
    pub fn broadcast(&self, text: String) {
        let channel = self.channel.clone();
        let console = self.console.clone();
        self.reactor.post(async move {
            let results = channel.send_data_to_all(CHANNEL_NUMBER_0, text.into_bytes()).await;
            print_send_results(&console, &results);
        });
    }

    /// Completion of a greeting started by the operator
    pub fn on_hello_response(&self, target: Endpoint, result: OperationResult, elapsed: Duration) {
        let elapsed = format_elapsed(elapsed);
        match result {
            Err(err) => {
                self.console
                    .line(format!("Received no HELLO response from {} after {}: {}", target, elapsed, err));
                self.apply(target, SessionEvent::GreetFailed);
            }
            Ok(()) => {
                self.console
                    .line(format!("Received HELLO response from {} after {}: Success", target, elapsed));
                self.apply(
                    target,
                    SessionEvent::Hello {
                        direction: HelloDirection::Outbound,
                    },
                );
                self.console.line(format!("Sending a presentation message to {}", target));
            }
        }
    }

    // ------------------------------------------------------------------------
    // State machine plumbing
    // ------------------------------------------------------------------------

    /// Dispatch into the registry and post the resulting effects
    fn apply(&self, endpoint: Endpoint, event: SessionEvent) {
        match self.registry.dispatch(endpoint, event) {
            Ok(transition) => {
                if transition.audit.implied_hello {
                    debug!("{}: presentation received before any HELLO", endpoint);
                }
                for effect in transition.effects {
                    self.run_effect(effect);
                }
            }
            Err(err) => warn!("Ignoring protocol event: {}", err),
        }
    }

    fn run_effect(&self, effect: Effect) {
        let channel = self.channel.clone();
        let console = self.console.clone();
        match effect {
            Effect::IntroduceTo(target) => {
                self.reactor.post(async move {
                    let result = channel.introduce_to(target).await;
                    console.line(format!("async_introduce_to(): {}", Outcome(&result)));
                });
            }
            Effect::RequestSession(target) => {
                self.reactor.post(async move {
                    let result = channel.request_session(target).await;
                    console.line(format!("async_request_session(): {}", Outcome(&result)));
                });
            }
        }
    }

    fn print_session_block(&self, title: &str, host: Endpoint, is_new: bool, local: &AlgorithmInfo, remote: &AlgorithmInfo) {
        let mut block = self.console.lock();
        block.line(format!("{} {}", title, host));
        block.line(format!("New session: {}", is_new));
        block.line(format!("Local algorithms: {}", local));
        block.line(format!("Remote algorithms: {}", remote));
    }

    /// Print a data payload, or report why it was dropped
    pub fn display_data(&self, sender: Endpoint, channel: ChannelNumber, data: &[u8]) -> Result<(), Ignored> {
        let text = core::str::from_utf8(data).map_err(|_| Ignored(IgnoreReason::UndecodablePayload))?;
        self.console.line(format!("{} ({}): {}", sender, channel, text));
        Ok(())
    }
}

impl ChannelEvents for ChatHandlers {
    fn on_hello(&self, sender: Endpoint, default_accept: bool) -> bool {
        self.console.line(format!("Received HELLO request from {}", sender));
        // Introduce ourselves whatever the engine is told
        self.apply(
            sender,
            SessionEvent::Hello {
                direction: HelloDirection::Inbound,
            },
        );
        self.policy.hello(default_accept)
    }

    fn on_presentation(&self, sender: Endpoint, certificate: &Certificate, is_new: bool) -> bool {
        self.console.line(format!(
            "Received PRESENTATION from {} ({}) - {}",
            sender,
            certificate.subject,
            if is_new { "new" } else { "existing" }
        ));
        debug!("{} presented key {}", sender, certificate.short_key());
        self.apply(sender, SessionEvent::Presentation { is_new });
        true
    }

    fn on_session_request(&self, sender: Endpoint, ciphers: &[CipherAlgorithm], default_accept: bool) -> bool {
        self.console.line(format!("Received SESSION_REQUEST from {}", sender));
        debug!("{} offers {} cipher(s)", sender, ciphers.len());
        self.apply(sender, SessionEvent::SessionRequest);
        self.policy.session_request(default_accept)
    }

    fn on_session(&self, sender: Endpoint, cipher: CipherAlgorithm, default_accept: bool) -> bool {
        self.console.line(format!("Received SESSION from {}", sender));
        debug!("{} chose {}", sender, cipher);
        self.apply(sender, SessionEvent::SessionProposal);
        self.policy.session(default_accept)
    }

    fn on_session_failed(&self, host: Endpoint, is_new: bool, local: &AlgorithmInfo, remote: &AlgorithmInfo) {
        self.print_session_block("Session failed with", host, is_new, local, remote);
        self.apply(
            host,
            SessionEvent::SessionFailed {
                is_new,
                local: *local,
                remote: *remote,
            },
        );
    }

    fn on_session_established(&self, host: Endpoint, is_new: bool, local: &AlgorithmInfo, remote: &AlgorithmInfo) {
        self.print_session_block("Session established with", host, is_new, local, remote);
        self.apply(
            host,
            SessionEvent::SessionEstablished {
                is_new,
                local: *local,
                remote: *remote,
            },
        );
    }

    fn on_session_lost(&self, host: Endpoint) {
        self.console.line(format!("Session lost with {}", host));
        self.apply(host, SessionEvent::SessionLost);
    }

    fn on_data(&self, sender: Endpoint, channel: ChannelNumber, data: &[u8]) {
        if let Err(ignored) = self.display_data(sender, channel, data) {
            debug!("Dropped data from {}: {:?}", sender, ignored.reason());
        }
    }
}

/// One line per peer, in endpoint order, as one block
pub fn print_send_results(console: &Console, results: &SendResults) {
    let mut block = console.lock();
    for (endpoint, result) in results {
        block.line(format!("{}: {}", endpoint, Outcome(result)));
    }
}

/// `HH:MM:SS.ffffff`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CapturedOutput;
    use crate::errors::OperationError;
    use crate::session::SessionState;
    use crate::testing::{ChannelCall, RecordingChannel};
    use crate::types::DigestAlgorithm;

    fn create_test_endpoint() -> Endpoint {
        "10.0.0.2:5000".parse().unwrap()
    }

    fn create_test_algorithms() -> AlgorithmInfo {
        AlgorithmInfo::new(CipherAlgorithm::ChaCha20Poly1305, DigestAlgorithm::Sha256)
    }

    fn create_test_handlers(policy: PolicyConfig) -> (Arc<ChatHandlers>, Arc<RecordingChannel>, CapturedOutput) {
        let channel = Arc::new(RecordingChannel::new());
        let (console, captured) = Console::captured();
        let handlers = Arc::new(ChatHandlers::new(
            channel.clone(),
            Arc::new(SessionRegistry::default()),
            Arc::new(console),
            Reactor::current(),
            policy,
        ));
        (handlers, channel, captured)
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_micros(3_000_123)), "00:00:03.000123");
        assert_eq!(format_elapsed(Duration::from_secs(3_723)), "01:02:03.000000");
    }

    #[tokio::test]
    async fn test_inbound_hello_posts_introduce() {
        let (handlers, channel, captured) = create_test_handlers(PolicyConfig::default());
        let peer = create_test_endpoint();

        assert!(handlers.on_hello(peer, true));
        handlers.reactor().drain().await;

        assert!(captured.contains("Received HELLO request from 10.0.0.2:5000"));
        assert!(captured.contains("async_introduce_to(): Success"));
        assert_eq!(channel.calls(), vec![ChannelCall::IntroduceTo(peer)]);
        assert_eq!(handlers.registry().state_of(&peer), SessionState::HandshakeInitiated);
    }

    #[tokio::test]
    async fn test_rejected_hello_still_introduces() {
        let (handlers, channel, _captured) = create_test_handlers(PolicyConfig::default());
        let peer = create_test_endpoint();

        assert!(!handlers.on_hello(peer, false));
        handlers.reactor().drain().await;
        assert_eq!(channel.calls(), vec![ChannelCall::IntroduceTo(peer)]);
    }

    #[tokio::test]
    async fn test_policy_overrides_only_the_answer() {
        let policy = PolicyConfig {
            accept_hello: Some(false),
            accept_session_request: Some(false),
            ..Default::default()
        };
        let (handlers, channel, captured) = create_test_handlers(policy);
        let peer = create_test_endpoint();
        let certificate = Certificate::new("CN=peer2", [7u8; 32]);

        assert!(!handlers.on_hello(peer, true));
        assert!(handlers.on_presentation(peer, &certificate, true));
        assert!(!handlers.on_session_request(peer, &[CipherAlgorithm::Aes256Gcm], true));
        handlers.reactor().drain().await;

        let calls = channel.calls();
        assert!(calls.contains(&ChannelCall::IntroduceTo(peer)));
        assert!(calls.contains(&ChannelCall::RequestSession(peer)));
        assert!(captured.contains("async_request_session(): Success"));
        assert_eq!(handlers.registry().state_of(&peer), SessionState::SessionRequested);
    }

    #[tokio::test]
    async fn test_failed_greet_reports_error() {
        let (handlers, channel, captured) = create_test_handlers(PolicyConfig::default());
        let peer = create_test_endpoint();
        handlers.on_hello_response(peer, Err(OperationError::Timeout), Duration::from_secs(3));
        handlers.reactor().drain().await;

        assert!(captured.contains("Received no HELLO response from 10.0.0.2:5000 after 00:00:03.000000: Operation timed out"));
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_session_block_is_contiguous() {
        let (handlers, _channel, captured) = create_test_handlers(PolicyConfig::default());
        let peer = create_test_endpoint();
        let algorithms = create_test_algorithms();

        handlers.on_session_failed(peer, true, &algorithms, &algorithms);
        assert_eq!(
            captured.stdout_lines(),
            vec![
                "Session failed with 10.0.0.2:5000".to_string(),
                "New session: true".to_string(),
                "Local algorithms: cipher: chacha20-poly1305, digest: sha256".to_string(),
                "Remote algorithms: cipher: chacha20-poly1305, digest: sha256".to_string(),
            ]
        );
        assert_eq!(handlers.registry().state_of(&peer), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_established_without_presentation_is_rejected() {
        let (handlers, _channel, captured) = create_test_handlers(PolicyConfig::default());
        let peer = create_test_endpoint();
        let algorithms = create_test_algorithms();

        handlers.on_session_established(peer, true, &algorithms, &algorithms);
        assert!(captured.contains("Session established with 10.0.0.2:5000"));
        assert_eq!(handlers.registry().state_of(&peer), SessionState::Unknown);
    }

    #[tokio::test]
    async fn test_data_display() {
        let (handlers, _channel, captured) = create_test_handlers(PolicyConfig::default());
        let peer = create_test_endpoint();

        handlers.on_data(peer, 0, b"hi there");
        assert_eq!(
            handlers.display_data(peer, 0, &[0xff, 0xfe]),
            Err(Ignored(IgnoreReason::UndecodablePayload))
        );
        assert_eq!(captured.stdout_lines(), vec!["10.0.0.2:5000 (0): hi there"]);
    }

    #[tokio::test]
    async fn test_broadcast_prints_per_peer_results() {
        let (handlers, channel, captured) = create_test_handlers(PolicyConfig::default());
        let a: Endpoint = "10.0.0.3:5000".parse().unwrap();
        let b: Endpoint = "10.0.0.2:5000".parse().unwrap();
        channel.set_peers(vec![a, b]);

        handlers.broadcast("hello".to_string());
        handlers.reactor().drain().await;

        assert_eq!(
            captured.stdout_lines(),
            vec!["10.0.0.2:5000: Success", "10.0.0.3:5000: Success"]
        );
    }
}
