//! Reactor thread pool
//!
//! A multi-threaded tokio runtime running every I/O completion, protocol hook
//! and chained operation. `Reactor` is the cloneable posting handle; it counts
//! posted tasks so shutdown can wait for the pool to run dry.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::{Result, SchatError};

const THREAD_NAME: &str = "schat-reactor";

// ----------------------------------------------------------------------------
// Pool
// ----------------------------------------------------------------------------

/// Owns the worker threads
pub struct ReactorPool {
    runtime: Runtime,
    threads: usize,
}

impl ReactorPool {
    /// Start `threads` workers, or one per available core when `None`
    pub fn start(threads: Option<usize>) -> Result<Self> {
        let threads = resolve_thread_count(threads);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name(THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| SchatError::Runtime(format!("Failed to build reactor pool: {}", e)))?;
        info!("Reactor pool started with {} thread(s)", threads);
        Ok(Self { runtime, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Posting handle bound to this pool
    pub fn reactor(&self) -> Reactor {
        Reactor::new(self.runtime.handle().clone())
    }

    /// Drive `fut` to completion from the calling thread
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Stop the pool, waiting up to `timeout` for workers to exit
    pub fn join(self, timeout: Duration) {
        self.runtime.shutdown_timeout(timeout);
        debug!("Reactor pool joined");
    }
}

/// Configured count, else available parallelism, never below one
pub fn resolve_thread_count(threads: Option<usize>) -> usize {
    threads
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
        .max(1)
}

// ----------------------------------------------------------------------------
// Posting Handle
// ----------------------------------------------------------------------------

struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when the task ends or is dropped
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Cloneable handle for posting work onto the pool
#[derive(Clone)]
pub struct Reactor {
    handle: Handle,
    in_flight: Arc<InFlight>,
}

impl Reactor {
    fn new(handle: Handle) -> Self {
        Self {
            handle,
            in_flight: Arc::new(InFlight {
                count: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Handle on the runtime the caller is running in.
    ///
    /// Panics outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Run `fut` on the pool
    pub fn post<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(self.in_flight.clone());
        self.handle.spawn(async move {
            let _guard = guard;
            fut.await
        })
    }

    /// Number of posted tasks not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait until no posted task is in flight
    pub async fn drain(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl core::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reactor").field("in_flight", &self.in_flight()).finish()
    }
}
