//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::Parser;

use schat_core::{CipherAlgorithm, DigestAlgorithm};

/// Secure peer-to-peer chat over UDP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Certificate presented to peers (TOML)
    pub certificate: PathBuf,

    /// Ed25519 private key matching the certificate (hex)
    pub private_key: PathBuf,

    /// Host or address to listen on
    pub listen_host: String,

    /// UDP port to listen on
    pub listen_port: u16,

    /// Session cipher (chacha20-poly1305 or aes-256-gcm)
    pub cipher: CipherAlgorithm,

    /// Digest for session key derivation (sha256 or sha512)
    pub digest: DigestAlgorithm,
}

/// Generate a certificate and private key pair
#[derive(Parser, Debug)]
#[command(name = "schat-keygen", author, version, about, long_about = None)]
pub struct KeygenCli {
    /// Certificate subject, e.g. "CN=alice"
    pub subject: String,

    /// Where to write the certificate
    pub certificate: PathBuf,

    /// Where to write the private key
    pub private_key: PathBuf,
}
