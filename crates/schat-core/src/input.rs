//! Operator input
//!
//! Two ways of reading lines: `LineReader` reads asynchronously on the reactor
//! and can be closed from any thread through its `InputCloser`; the blocking
//! reader runs on its own OS thread and posts each line to the reactor.
//!
//! Blocking sources such as stdin reach `LineReader` through `ThreadedReader`,
//! which keeps the read off the runtime so a pending read never holds up
//! the pool at shutdown.

use std::io::{self, BufRead};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::thread;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, ReadBuf};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::command::CommandInterpreter;
use crate::reactor::Reactor;
use crate::shutdown::Shutdown;

const FEED_DEPTH: usize = 16;

/// Read one raw line into `buf`. `Ok(false)` at end of input.
///
/// Invalid UTF-8 is not an error here; callers decode lossily.
fn read_raw_line<R: BufRead>(input: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    loop {
        match input.read_until(b'\n', buf) {
            Ok(read) => return Ok(read > 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Strip the line terminator and cap the length at a char boundary
pub fn normalize_line(mut line: String, max_len: usize) -> String {
    if line.ends_with('\n') {
        line.pop();
    }
    if line.ends_with('\r') {
        line.pop();
    }
    if line.len() > max_len {
        let mut cut = max_len;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }
    line
}

// ----------------------------------------------------------------------------
// Closable async reader
// ----------------------------------------------------------------------------

struct CloserInner {
    closed: AtomicBool,
    notify: Notify,
}

/// Handle closing a `LineReader`
#[derive(Clone)]
pub struct InputCloser {
    inner: Arc<CloserInner>,
}

impl InputCloser {
    fn new() -> Self {
        Self {
            inner: Arc::new(CloserInner {
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Close the input. Returns `true` only for the first call.
    pub fn close(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_one();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Line reader over any async buffered source
pub struct LineReader<R> {
    reader: R,
    closer: InputCloser,
    max_line_length: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_line_length: usize) -> (Self, InputCloser) {
        let closer = InputCloser::new();
        let reader = Self {
            reader,
            closer: closer.clone(),
            max_line_length,
            buf: Vec::new(),
        };
        (reader, closer)
    }

    /// Next line, or `None` once the input hit EOF or was closed
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.closer.is_closed() {
            return Ok(None);
        }
        self.buf.clear();

        let read = tokio::select! {
            biased;
            _ = self.closer.closed() => return Ok(None),
            read = self.reader.read_until(b'\n', &mut self.buf) => read?,
        };
        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf).into_owned();
        Ok(Some(normalize_line(line, self.max_line_length)))
    }
}

/// Feed every line to the interpreter until the input ends
pub async fn run_line_loop<R: AsyncBufRead + Unpin>(mut reader: LineReader<R>, interpreter: &CommandInterpreter) {
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                interpreter.handle_line(&line).await;
            }
            Ok(None) => {
                debug!("Input closed");
                break;
            }
            Err(e) => {
                warn!("Input read failed: {}", e);
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Blocking reader thread
// ----------------------------------------------------------------------------

/// Read `input` on a dedicated thread, posting each line to the reactor.
///
/// End of input or a read error triggers shutdown. Undecodable bytes are
/// replaced, never fatal. The thread is detached; it may stay blocked in a
/// read after shutdown.
pub fn spawn_blocking_reader<R>(
    mut input: R,
    reactor: Reactor,
    interpreter: Arc<CommandInterpreter>,
    shutdown: Shutdown,
    max_line_length: usize,
) -> io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("schat-input".to_string())
        .spawn(move || {
            let mut buf = Vec::new();
            loop {
                match read_raw_line(&mut input, &mut buf) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!("Input read failed: {}", e);
                        break;
                    }
                }
                if shutdown.is_triggered() {
                    return;
                }
                let line = normalize_line(String::from_utf8_lossy(&buf).into_owned(), max_line_length);
                let interpreter = interpreter.clone();
                reactor.post(async move {
                    interpreter.handle_line(&line).await;
                });
            }
            debug!("Input exhausted");
            shutdown.trigger();
        })
}

// ----------------------------------------------------------------------------
// Blocking source as an async reader
// ----------------------------------------------------------------------------

/// Async reader fed line by line from a detached reading thread
pub struct ThreadedReader {
    lines: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ThreadedReader {
    /// Start the reading thread. Dropping the reader ends the thread after
    /// its current read returns.
    pub fn spawn<R>(mut input: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, lines) = mpsc::channel(FEED_DEPTH);
        thread::Builder::new()
            .name("schat-stdin".to_string())
            .spawn(move || {
                let mut buf = Vec::new();
                loop {
                    let item = match read_raw_line(&mut input, &mut buf) {
                        Ok(true) => Ok(buf.clone()),
                        Ok(false) => break,
                        Err(e) => Err(e),
                    };
                    let failed = item.is_err();
                    if tx.blocking_send(item).is_err() || failed {
                        break;
                    }
                }
            })?;
        Ok(Self {
            lines,
            chunk: Vec::new(),
            pos: 0,
        })
    }
}

impl AsyncRead for ThreadedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while this.pos == this.chunk.len() {
            match ready!(this.lines.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.chunk = chunk;
                    this.pos = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                // Sender gone: end of input
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = buf.remaining().min(this.chunk.len() - this.pos);
        buf.put_slice(&this.chunk[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::console::Console;
    use crate::handlers::ChatHandlers;
    use crate::registry::SessionRegistry;
    use crate::testing::{ChannelCall, RecordingChannel, StaticResolver};
    use std::time::Duration;

    #[test]
    fn test_normalize_line() {
        assert_eq!(normalize_line("hello\r\n".to_string(), 512), "hello");
        assert_eq!(normalize_line("abcdef".to_string(), 3), "abc");
        // 'é' is two bytes; never split it
        assert_eq!(normalize_line("aé".to_string(), 2), "a");
    }

    #[tokio::test]
    async fn test_reader_yields_lines_then_eof() {
        let input: &[u8] = b"first\r\nsecond\nthird";
        let (mut reader, _closer) = LineReader::new(input, 512);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("third"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_threaded_reader_feeds_line_reader() {
        let input = io::Cursor::new(b"one\n\xff\xfe two\nthree".to_vec());
        let source = tokio::io::BufReader::new(ThreadedReader::spawn(input).unwrap());
        let (mut reader, _closer) = LineReader::new(source, 512);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("\u{FFFD}\u{FFFD} two"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("three"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_reader_survives_invalid_utf8() {
        let channel = Arc::new(RecordingChannel::new());
        let (console, _captured) = Console::captured();
        let reactor = Reactor::current();
        let handlers = Arc::new(ChatHandlers::new(
            channel.clone(),
            Arc::new(SessionRegistry::default()),
            Arc::new(console),
            reactor.clone(),
            PolicyConfig::default(),
        ));
        let shutdown = Shutdown::new();
        let interpreter = Arc::new(CommandInterpreter::new(
            handlers,
            Arc::new(StaticResolver::new()),
            shutdown.clone(),
        ));

        let input = io::Cursor::new(b"\xff\xfe bad\nhello\n".to_vec());
        let reader = spawn_blocking_reader(input, reactor.clone(), interpreter, shutdown.clone(), 512).unwrap();
        tokio::task::spawn_blocking(move || reader.join()).await.unwrap().unwrap();
        reactor.drain().await;

        // Only the end of input stops the reader
        assert!(shutdown.is_triggered());
        assert!(channel.calls().contains(&ChannelCall::SendDataToAll {
            channel: 0,
            data: b"hello".to_vec(),
        }));
        assert_eq!(channel.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (_writer, pipe) = tokio::io::duplex(64);
        let (mut reader, closer) = LineReader::new(tokio::io::BufReader::new(pipe), 512);

        let pending = tokio::spawn(async move { reader.next_line().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(closer.close());
        assert!(!closer.close());
        let line = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("close did not unblock the reader")
            .unwrap();
        assert_eq!(line, None);
    }
}
