//! schat-keygen - write a fresh certificate and private key

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use schat_channel::Identity;
use schat_cli::KeygenCli;

fn main() -> ExitCode {
    let cli = KeygenCli::parse();

    match run(&cli) {
        Ok(public_key) => {
            println!("Wrote {} for {} ({})", cli.certificate.display(), cli.subject, public_key);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &KeygenCli) -> anyhow::Result<String> {
    let identity = Identity::generate(cli.subject.clone());
    identity
        .save(&cli.certificate, &cli.private_key)
        .with_context(|| format!("failed to write {}", cli.certificate.display()))?;
    Ok(identity.certificate().short_key())
}
