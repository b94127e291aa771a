//! schat - interactive secure chat client

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use schat_channel::{DatagramEngine, Identity};
use schat_cli::{Cli, CliError, SchatConfig};
use schat_core::{
    listen_for_signals, ChatClient, Console, Endpoint, Reactor, ReactorPool, Resolver, Shutdown,
    SystemResolver,
};

fn main() -> ExitCode {
    // Wrong argument count exits here with usage on stderr
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SchatConfig::load().context("failed to load configuration")?;
    setup_logging(&config)?;

    let identity = Identity::load(&cli.certificate, &cli.private_key).with_context(|| {
        format!(
            "failed to load identity from {} and {}",
            cli.certificate.display(),
            cli.private_key.display()
        )
    })?;

    let pool = ReactorPool::start(config.client.threads)?;
    let console = Arc::new(Console::stdio());
    debug!("Reactor pool running {} worker(s)", pool.threads());

    let shutdown = Shutdown::new();
    let result = pool.block_on(chat(
        &cli,
        identity,
        &config,
        console.clone(),
        shutdown.clone(),
        pool.reactor(),
    ));

    pool.join(config.client.join_timeout());
    shutdown.clear();
    result?;

    console.line("Chat closing...");
    Ok(())
}

/// Open the engine, wire the client to it and run until input ends
async fn chat(
    cli: &Cli,
    identity: Identity,
    config: &SchatConfig,
    console: Arc<Console>,
    shutdown: Shutdown,
    reactor: Reactor,
) -> Result<(), CliError> {
    let resolver = Arc::new(SystemResolver);
    let listen = resolve_listen(resolver.as_ref(), &cli.listen_host, cli.listen_port).await?;
    debug!("Resolved listen address {}", listen);

    let engine = DatagramEngine::open(listen.addr(), identity, cli.digest, config.channel.clone()).await?;
    engine.set_cipher_capabilities(vec![cli.cipher]);
    info!(
        "Listening on {} as {} ({}/{})",
        engine.local_addr()?,
        engine.certificate().subject,
        cli.cipher,
        cli.digest
    );

    let client = ChatClient::new(
        engine.clone(),
        console.clone(),
        reactor,
        resolver,
        shutdown.clone(),
        config.client.clone(),
        config.policy,
    );
    engine.set_event_hooks(client.handlers());

    let signals = listen_for_signals(shutdown, console);
    let outcome = client.run_stdin().await;
    for handle in signals {
        handle.abort();
    }
    outcome?;
    Ok(())
}

async fn resolve_listen(resolver: &dyn Resolver, host: &str, port: u16) -> Result<Endpoint, CliError> {
    resolver
        .resolve(host, &port.to_string())
        .await
        .map_err(|err| CliError::Resolve(format!("{}:{} ({})", host, port, err)))
}

/// Diagnostics go to stderr so they never mix with chat output
fn setup_logging(config: &SchatConfig) -> Result<(), CliError> {
    let level = config.log.level_filter()?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}
