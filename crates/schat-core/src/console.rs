//! Console output sink
//!
//! Every piece of human-readable output goes through one `Console`. A single
//! mutex guards both streams so that lines written by concurrent handlers never
//! interleave, and multi-line blocks can be written atomically through
//! [`Console::lock`].

use core::fmt::Display;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

struct Streams {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    write_failed: bool,
}

impl Streams {
    fn emit(&mut self, to_err: bool, line: &dyn Display) {
        let writer = if to_err { &mut self.err } else { &mut self.out };
        let result = writeln!(writer, "{}", line).and_then(|_| writer.flush());
        if let Err(e) = result {
            // A closed terminal must not take a reactor worker down with it
            if !self.write_failed {
                self.write_failed = true;
                debug!("Console write failed: {}", e);
            }
        }
    }
}

/// Serialized writer for stdout/stderr
pub struct Console {
    streams: Mutex<Streams>,
}

impl Console {
    /// Console over the process stdout and stderr
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Console over arbitrary writers
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            streams: Mutex::new(Streams {
                out,
                err,
                write_failed: false,
            }),
        }
    }

    /// Write one line to the output stream
    pub fn line(&self, line: impl Display) {
        self.lock().line(line);
    }

    /// Write one line to the error stream
    pub fn error_line(&self, line: impl Display) {
        self.lock().error_line(line);
    }

    /// Hold the console for a contiguous block of lines.
    ///
    /// The lock is released when the guard drops, on every path.
    pub fn lock(&self) -> ConsoleGuard<'_> {
        ConsoleGuard {
            streams: self.streams.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl core::fmt::Debug for Console {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// Exclusive access to the console
pub struct ConsoleGuard<'a> {
    streams: MutexGuard<'a, Streams>,
}

impl ConsoleGuard<'_> {
    pub fn line(&mut self, line: impl Display) {
        self.streams.emit(false, &line);
    }

    pub fn error_line(&mut self, line: impl Display) {
        self.streams.emit(true, &line);
    }
}

// ----------------------------------------------------------------------------
// Captured Output (tests)
// ----------------------------------------------------------------------------

#[cfg(any(test, feature = "testing"))]
pub use captured::{CapturedOutput, SharedBuffer};

#[cfg(any(test, feature = "testing"))]
mod captured {
    use super::Console;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex, PoisonError};

    /// In-memory writer shared between the console and the test
    #[derive(Debug, Clone, Default)]
    pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Handle on everything a captured console printed
    #[derive(Debug, Clone, Default)]
    pub struct CapturedOutput {
        pub out: SharedBuffer,
        pub err: SharedBuffer,
    }

    impl CapturedOutput {
        pub fn stdout_lines(&self) -> Vec<String> {
            self.out.contents().lines().map(str::to_owned).collect()
        }

        pub fn stderr_lines(&self) -> Vec<String> {
            self.err.contents().lines().map(str::to_owned).collect()
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.stdout_lines().iter().any(|line| line == needle)
        }
    }

    impl Console {
        /// Console writing into memory
        pub fn captured() -> (Console, CapturedOutput) {
            let captured = CapturedOutput::default();
            let console = Console::new(Box::new(captured.out.clone()), Box::new(captured.err.clone()));
            (console, captured)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
