//! OS signal listener.
//!
//! SIGINT, SIGTERM and SIGABRT all request shutdown through the shared
//! `Shutdown` context. A signal that cannot be registered is reported and
//! skipped.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::console::Console;
use crate::shutdown::Shutdown;

/// Handle a delivered signal: trigger shutdown if an action is still armed
pub fn on_signal(name: &str, shutdown: &Shutdown, console: &Console) -> bool {
    if !shutdown.is_armed() {
        debug!("{} ignored, nothing to stop", name);
        return false;
    }
    info!("Received {}, initiating shutdown...", name);
    console.error_line("Signal caught: stopping...");
    shutdown.trigger()
}

/// Spawn the listener on the current runtime.
///
/// The listener runs until the runtime shuts down.
#[cfg(unix)]
pub fn listen_for_signals(shutdown: Shutdown, console: Arc<Console>) -> Vec<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        ("SIGINT", SignalKind::interrupt()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGABRT", SignalKind::from_raw(libc::SIGABRT)),
    ];

    let mut handles = Vec::with_capacity(kinds.len());
    for (name, kind) in kinds {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Cannot register {}: {}", name, e);
                console.error_line(format!("Failed to catch {} signals.", name));
                continue;
            }
        };

        let shutdown = shutdown.clone();
        let console = console.clone();
        handles.push(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                on_signal(name, &shutdown, &console);
            }
        }));
    }
    handles
}

#[cfg(not(unix))]
pub fn listen_for_signals(shutdown: Shutdown, console: Arc<Console>) -> Vec<JoinHandle<()>> {
    vec![tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                debug!("Cannot register Ctrl+C: {}", e);
                console.error_line("Failed to catch SIGINT signals.");
                return;
            }
            on_signal("SIGINT", &shutdown, &console);
        }
    })]
}
