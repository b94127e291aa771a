//! Two engines on loopback, driven by the real chat handlers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use schat_channel::{ChannelConfig, DatagramEngine, Identity};
use schat_core::console::CapturedOutput;
use schat_core::{
    ChatHandlers, Console, DigestAlgorithm, Endpoint, OperationError, PolicyConfig, Reactor, SecureChannel,
    SessionRegistry, SessionState,
};

struct TestPeer {
    engine: Arc<DatagramEngine>,
    handlers: Arc<ChatHandlers>,
    captured: CapturedOutput,
    endpoint: Endpoint,
}

fn test_config() -> ChannelConfig {
    ChannelConfig {
        hello_timeout_ms: 300,
        keepalive_period_ms: 100,
        session_timeout_ms: 400,
        ..Default::default()
    }
}

async fn create_test_peer(subject: &str, config: ChannelConfig) -> TestPeer {
    let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let engine = DatagramEngine::open(listen, Identity::generate(subject), DigestAlgorithm::Sha256, config)
        .await
        .unwrap();
    let endpoint = Endpoint::from(engine.local_addr().unwrap());

    let (console, captured) = Console::captured();
    let handlers = Arc::new(ChatHandlers::new(
        engine.clone(),
        Arc::new(SessionRegistry::default()),
        Arc::new(console),
        Reactor::current(),
        PolicyConfig::default(),
    ));
    engine.set_event_hooks(handlers.clone());

    TestPeer {
        engine,
        handlers,
        captured,
        endpoint,
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn establish(a: &TestPeer, b: &TestPeer) {
    a.handlers.greet(b.endpoint);
    wait_until("sessions in both directions", || {
        a.engine.established_peers() == vec![b.endpoint] && b.engine.established_peers() == vec![a.endpoint]
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_greeting_establishes_sessions_both_ways() {
    let alice = create_test_peer("CN=alice", test_config()).await;
    let bob = create_test_peer("CN=bob", test_config()).await;

    establish(&alice, &bob).await;

    wait_until("established state", || {
        alice.handlers.registry().state_of(&bob.endpoint) == SessionState::Established
            && bob.handlers.registry().state_of(&alice.endpoint) == SessionState::Established
    })
    .await;
    assert!(alice
        .captured
        .contains(&format!("Received PRESENTATION from {} (CN=bob) - new", bob.endpoint)));
    assert!(bob
        .captured
        .contains(&format!("Received HELLO request from {}", alice.endpoint)));
    assert!(alice
        .captured
        .contains(&format!("Session established with {}", bob.endpoint)));

    alice.engine.close();
    bob.engine.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_reaches_peer() {
    let alice = create_test_peer("CN=alice", ChannelConfig::default()).await;
    let bob = create_test_peer("CN=bob", ChannelConfig::default()).await;
    establish(&alice, &bob).await;

    let results = alice.engine.send_data_to_all(0, b"hello bob".to_vec()).await;
    assert_eq!(results.get(&bob.endpoint), Some(&Ok(())));

    let expected = format!("{} (0): hello bob", alice.endpoint);
    wait_until("chat line at bob", || bob.captured.contains(&expected)).await;

    alice.engine.close();
    bob.engine.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_greet_without_listener_times_out() {
    let alice = create_test_peer("CN=alice", test_config()).await;
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = Endpoint::from(silent.local_addr().unwrap());

    let outcome = alice.engine.greet(target).await;
    assert_eq!(outcome.result, Err(OperationError::Timeout));
    assert!(outcome.elapsed >= Duration::from_millis(300));
    alice.engine.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_request_needs_presentation() {
    let alice = create_test_peer("CN=alice", test_config()).await;
    let target: Endpoint = "127.0.0.1:9".parse().unwrap();
    assert_eq!(
        alice.engine.request_session(target).await,
        Err(OperationError::NoPresentation)
    );
    alice.engine.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_fails_pending_and_later_operations() {
    let alice = create_test_peer("CN=alice", ChannelConfig::default()).await;
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = Endpoint::from(silent.local_addr().unwrap());

    let engine = alice.engine.clone();
    let pending = tokio::spawn(async move { engine.greet(target).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(alice.engine.close());
    assert!(!alice.engine.close());
    assert_eq!(pending.await.unwrap().result, Err(OperationError::Closed));
    assert_eq!(alice.engine.introduce_to(target).await, Err(OperationError::Closed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_peer_session_is_lost() {
    let alice = create_test_peer("CN=alice", test_config()).await;
    let bob = create_test_peer("CN=bob", test_config()).await;
    establish(&alice, &bob).await;

    bob.engine.close();
    let expected = format!("Session lost with {}", bob.endpoint);
    wait_until("session loss", || alice.captured.contains(&expected)).await;
    assert_eq!(
        alice.handlers.registry().state_of(&bob.endpoint),
        SessionState::Lost
    );
    assert!(alice.engine.established_peers().is_empty());
    alice.engine.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_garbage_datagrams_are_ignored() {
    let alice = create_test_peer("CN=alice", ChannelConfig::default()).await;
    let bob = create_test_peer("CN=bob", ChannelConfig::default()).await;

    let noise = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    noise.send_to(&[0xde, 0xad, 0xbe, 0xef], alice.endpoint.addr()).await.unwrap();

    establish(&alice, &bob).await;
    alice.engine.close();
    bob.engine.close();
}
