//! End-to-end tests for the chat client against the recording channel

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use schat_core::testing::{ChannelCall, RecordingChannel, StaticResolver};
use schat_core::{
    Certificate, ChannelEvents, ChatClient, ClientConfig, Console, Endpoint, PolicyConfig, Reactor, ReactorPool,
    SecureChannel, SessionState, Shutdown, ThreadedReader,
};

/// Input that never produces a line, like a terminal nobody types into
struct IdleInput;

impl Read for IdleInput {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        thread::sleep(Duration::from_secs(60));
        Ok(0)
    }
}

fn create_test_client(channel: Arc<RecordingChannel>, resolver: StaticResolver) -> (ChatClient, schat_core::console::CapturedOutput) {
    let (console, captured) = Console::captured();
    let client = ChatClient::new(
        channel,
        Arc::new(console),
        Reactor::current(),
        Arc::new(resolver),
        Shutdown::new(),
        ClientConfig::default(),
        PolicyConfig::default(),
    );
    (client, captured)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hello_then_presentation_requests_session() {
    let channel = Arc::new(RecordingChannel::new());
    let (client, captured) = create_test_client(channel.clone(), StaticResolver::new());
    let handlers = client.handlers();
    let peer: Endpoint = "10.0.0.2:5000".parse().unwrap();

    assert!(handlers.on_hello(peer, true));
    handlers.reactor().drain().await;

    let certificate = Certificate::new("CN=peer2", [7u8; 32]);
    assert!(handlers.on_presentation(peer, &certificate, true));
    handlers.reactor().drain().await;

    let lines = captured.stdout_lines();
    let position = |needle: &str| lines.iter().position(|line| line == needle);
    let hello = position("Received HELLO request from 10.0.0.2:5000").expect("hello line");
    let presentation = position("Received PRESENTATION from 10.0.0.2:5000 (CN=peer2) - new").expect("presentation line");
    assert!(hello < presentation);
    assert!(position("async_introduce_to(): Success").is_some());
    assert!(position("async_request_session(): Success").is_some());

    assert_eq!(
        channel.calls(),
        vec![ChannelCall::IntroduceTo(peer), ChannelCall::RequestSession(peer)]
    );
    assert_eq!(
        handlers.registry().state_of(&peer),
        SessionState::PresentationReceived
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quit_with_slow_sends_in_flight() {
    let channel = Arc::new(RecordingChannel::new());
    let peer: Endpoint = "10.0.0.2:5000".parse().unwrap();
    channel.set_peers(vec![peer]);
    channel.set_send_delay(Duration::from_millis(200));
    let (client, captured) = create_test_client(channel.clone(), StaticResolver::new());

    let input: &[u8] = b"first\nsecond\n!quit\nnever sent\n";
    tokio::time::timeout(Duration::from_secs(5), client.run(input))
        .await
        .expect("client did not stop")
        .unwrap();

    assert!(client.shutdown().is_triggered());
    assert!(channel.is_closed());
    assert_eq!(channel.close_calls(), 1);
    assert_eq!(client.handlers().reactor().in_flight(), 0);

    // Both sends were issued and completed, the line after !quit was not read
    let sends: Vec<_> = channel
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ChannelCall::SendDataToAll { .. }))
        .collect();
    assert_eq!(sends.len(), 2);
    let results: Vec<_> = captured
        .stdout_lines()
        .into_iter()
        .filter(|line| line.starts_with("10.0.0.2:5000: "))
        .collect();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_unresolvable_connect_issues_no_operation() {
    let channel = Arc::new(RecordingChannel::new());
    let (client, captured) = create_test_client(channel.clone(), StaticResolver::new());

    let input: &[u8] = b"!connect no.such.host 12000\n";
    client.run(input).await.unwrap();

    assert!(channel.calls().is_empty());
    let errors = captured.stderr_lines();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Unable to resolve the specified host/port: "));
}

#[test]
fn test_concurrent_triggers_run_action_once() {
    for _ in 0..50 {
        let shutdown = Shutdown::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        shutdown.set_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shutdown = shutdown.clone();
                thread::spawn(move || shutdown.trigger())
            })
            .collect();
        let ran: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();

        assert_eq!(ran, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_shutdown_during_pending_read_joins_promptly() {
    let pool = ReactorPool::start(Some(2)).unwrap();
    let channel = Arc::new(RecordingChannel::new());
    let started = Instant::now();

    pool.block_on(async {
        let (client, _captured) = create_test_client(channel.clone(), StaticResolver::new());
        let shutdown = client.shutdown().clone();
        thread::spawn(move || {
            while !shutdown.is_armed() {
                thread::sleep(Duration::from_millis(5));
            }
            shutdown.trigger();
        });

        let input = ThreadedReader::spawn(std::io::BufReader::new(IdleInput)).unwrap();
        client.run(tokio::io::BufReader::new(input)).await.unwrap();
    });
    pool.join(Duration::from_secs(5));

    assert!(channel.is_closed());
    assert!(started.elapsed() < Duration::from_secs(2), "join took {:?}", started.elapsed());
}

#[test]
fn test_concurrent_console_writers_never_interleave() {
    const WRITERS: usize = 8;
    const LINES: usize = 200;

    let (console, captured) = Console::captured();
    let console = Arc::new(console);

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let console = console.clone();
            thread::spawn(move || {
                for line in 0..LINES {
                    if line % 10 == 0 {
                        let mut block = console.lock();
                        block.line(format!("writer {} block {} a", writer, line));
                        block.line(format!("writer {} block {} b", writer, line));
                    } else {
                        console.line(format!("writer {} line {}", writer, line));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let lines = captured.stdout_lines();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for line in &lines {
        *seen.entry(line.as_str()).or_default() += 1;
    }

    // Every line each writer produced appears intact exactly once
    let mut expected = 0;
    for writer in 0..WRITERS {
        for line in 0..LINES {
            let markers = if line % 10 == 0 {
                vec![
                    format!("writer {} block {} a", writer, line),
                    format!("writer {} block {} b", writer, line),
                ]
            } else {
                vec![format!("writer {} line {}", writer, line)]
            };
            for marker in markers {
                assert_eq!(seen.get(marker.as_str()), Some(&1), "marker {:?}", marker);
                expected += 1;
            }
        }
    }
    assert_eq!(lines.len(), expected);

    // Blocks stay contiguous
    for (index, line) in lines.iter().enumerate() {
        if line.ends_with(" a") {
            let expected = format!("{}b", &line[..line.len() - 1]);
            assert_eq!(lines[index + 1], expected);
        }
    }
}
