//! Graceful shutdown coordination.
//!
//! `Shutdown` holds at most one armed action. Triggering takes the action out
//! under the lock and runs it outside the lock, so concurrent triggers (a
//! signal racing `!quit`) run it exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

/// Action run when shutdown is requested
pub type ShutdownAction = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    action: Mutex<Option<ShutdownAction>>,
    triggered: AtomicBool,
    notify: Notify,
}

/// Shared shutdown context. Clones refer to the same state.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                action: Mutex::new(None),
                triggered: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    fn action(&self) -> MutexGuard<'_, Option<ShutdownAction>> {
        self.inner.action.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm `action`, replacing any previous one.
    ///
    /// Returns `false` and drops `action` when shutdown already happened.
    pub fn set_action<F>(&self, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.action();
        if self.inner.triggered.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(Box::new(action));
        true
    }

    /// Drop the armed action without running it
    pub fn clear(&self) {
        self.action().take();
    }

    /// Request shutdown. Returns whether an action ran.
    pub fn trigger(&self) -> bool {
        let action = {
            let mut slot = self.action();
            self.inner.triggered.store(true, Ordering::SeqCst);
            slot.take()
        };
        self.inner.notify.notify_waiters();

        match action {
            Some(action) => {
                debug!("Running shutdown action");
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.action().is_some()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Wait until shutdown has been requested
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shutdown")
            .field("armed", &self.is_armed())
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_trigger_runs_action_once() {
        let shutdown = Shutdown::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        assert!(shutdown.set_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(shutdown.is_armed());

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!shutdown.is_armed());
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_set_action_replaces_previous() {
        let shutdown = Shutdown::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let first = ran.clone();
        let second = ran.clone();
        shutdown.set_action(move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        shutdown.set_action(move || {
            second.fetch_add(10, Ordering::SeqCst);
        });
        shutdown.trigger();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_clear_and_late_arm() {
        let shutdown = Shutdown::new();
        shutdown.set_action(|| panic!("cleared action must not run"));
        shutdown.clear();
        assert!(!shutdown.trigger());

        // Arming after the fact is refused
        assert!(!shutdown.set_action(|| panic!("late action must not run")));
        assert!(!shutdown.is_armed());
    }

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait did not resolve")
            .unwrap();

        // Already triggered: resolves immediately
        shutdown.wait().await;
    }
}
