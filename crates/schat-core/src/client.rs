//! Chat client orchestration
//!
//! Wires the registry, handlers and interpreter around one engine and runs a
//! session of operator input through to a clean stop.

use std::io::BufRead;
use std::sync::Arc;

use tokio::io::AsyncBufRead;
use tracing::{info, warn};

use crate::command::{CommandInterpreter, Resolver};
use crate::config::{ClientConfig, InputMode, PolicyConfig};
use crate::console::Console;
use crate::engine::SecureChannel;
use crate::errors::Result;
use crate::handlers::ChatHandlers;
use crate::input::{run_line_loop, spawn_blocking_reader, LineReader, ThreadedReader};
use crate::reactor::{resolve_thread_count, Reactor};
use crate::registry::SessionRegistry;
use crate::shutdown::Shutdown;

/// Everything needed to run the chat loop
pub struct ChatClient {
    handlers: Arc<ChatHandlers>,
    interpreter: Arc<CommandInterpreter>,
    shutdown: Shutdown,
    config: ClientConfig,
}

impl ChatClient {
    pub fn new(
        channel: Arc<dyn SecureChannel>,
        console: Arc<Console>,
        reactor: Reactor,
        resolver: Arc<dyn Resolver>,
        shutdown: Shutdown,
        config: ClientConfig,
        policy: PolicyConfig,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let handlers = Arc::new(ChatHandlers::new(channel, registry, console, reactor, policy));
        let interpreter = Arc::new(CommandInterpreter::new(handlers.clone(), resolver, shutdown.clone()));
        Self {
            handlers,
            interpreter,
            shutdown,
            config,
        }
    }

    /// Event hooks to register with the engine
    pub fn handlers(&self) -> Arc<ChatHandlers> {
        self.handlers.clone()
    }

    pub fn interpreter(&self) -> &Arc<CommandInterpreter> {
        &self.interpreter
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Read the process stdin in the configured mode
    pub async fn run_stdin(&self) -> Result<()> {
        match self.config.input_mode {
            InputMode::Async => {
                let stdin = ThreadedReader::spawn(std::io::BufReader::new(std::io::stdin()))?;
                self.run(tokio::io::BufReader::new(stdin)).await
            }
            InputMode::Thread => self.run_threaded(std::io::BufReader::new(std::io::stdin())).await,
        }
    }

    /// Run with a closable async reader; shutdown closes the input
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let (reader, closer) = LineReader::new(input, self.config.max_line_length);
        self.shutdown.set_action(move || {
            closer.close();
        });
        self.announce(None);

        run_line_loop(reader, &self.interpreter).await;

        self.shutdown.clear();
        self.stop().await;
        Ok(())
    }

    /// Run with a blocking reader thread; shutdown closes the engine
    pub async fn run_threaded<R>(&self, input: R) -> Result<()>
    where
        R: BufRead + Send + 'static,
    {
        let channel = self.handlers.channel().clone();
        self.shutdown.set_action(move || {
            channel.close();
        });
        self.announce(Some("No non-blocking input available. Press Ctrl+C to exit."));

        spawn_blocking_reader(
            input,
            self.handlers.reactor().clone(),
            self.interpreter.clone(),
            self.shutdown.clone(),
            self.config.max_line_length,
        )?;

        self.shutdown.wait().await;
        self.stop().await;
        Ok(())
    }

    fn announce(&self, hint: Option<&str>) {
        let mut block = self.handlers.console().lock();
        block.line("Chat started. Type !quit to exit.");
        block.line(format!(
            "Starting client with {} thread(s).",
            resolve_thread_count(self.config.threads)
        ));
        if let Some(hint) = hint {
            block.line(hint);
        }
    }

    /// Close the engine and let in-flight operations finish
    async fn stop(&self) {
        if self.handlers.channel().close() {
            info!("Secure channel closed");
        }
        let reactor = self.handlers.reactor();
        if tokio::time::timeout(self.config.shutdown_timeout(), reactor.drain())
            .await
            .is_err()
        {
            warn!("{} operation(s) still in flight at shutdown", reactor.in_flight());
        }
    }
}
