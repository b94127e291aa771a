//! Core types for the schat client
//!
//! Newtypes and small value types shared between the orchestrator and the
//! secure channel engine.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::errors::SchatError;

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// Network address identifying one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Wrap a socket address
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Get the underlying socket address
    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl Deref for Endpoint {
    type Target = SocketAddr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Endpoint {
    type Err = SchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(Self)
            .map_err(|e| SchatError::Resolve(format!("invalid endpoint {:?}: {}", s, e)))
    }
}

// ----------------------------------------------------------------------------
// Channel Numbers
// ----------------------------------------------------------------------------

/// Logical sub-stream identifier multiplexed over one secure session
pub type ChannelNumber = u8;

/// The channel chat text travels on
pub const CHANNEL_NUMBER_0: ChannelNumber = 0;

// ----------------------------------------------------------------------------
// Algorithms
// ----------------------------------------------------------------------------

/// Symmetric cipher negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    ChaCha20Poly1305,
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// Every cipher the client knows about, in preference order
    pub const ALL: [CipherAlgorithm; 2] = [CipherAlgorithm::ChaCha20Poly1305, CipherAlgorithm::Aes256Gcm];

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = SchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chacha20-poly1305" | "chacha20poly1305" => Ok(CipherAlgorithm::ChaCha20Poly1305),
            "aes-256-gcm" | "aes256-gcm" | "aes256gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            other => Err(SchatError::Config(format!("unknown cipher algorithm: {}", other))),
        }
    }
}

/// Message digest used for session key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = SchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(SchatError::Config(format!("unknown digest algorithm: {}", other))),
        }
    }
}

/// Algorithms in use on one side of a session. Displayed, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmInfo {
    pub cipher: CipherAlgorithm,
    pub digest: DigestAlgorithm,
}

impl AlgorithmInfo {
    pub fn new(cipher: CipherAlgorithm, digest: DigestAlgorithm) -> Self {
        Self { cipher, digest }
    }
}

impl fmt::Display for AlgorithmInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cipher: {}, digest: {}", self.cipher, self.digest)
    }
}

// ----------------------------------------------------------------------------
// Certificate
// ----------------------------------------------------------------------------

/// Signing certificate presented by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// One-line subject, e.g. `CN=alice`
    pub subject: String,
    /// Ed25519 verifying key
    pub public_key: [u8; 32],
}

impl Certificate {
    pub fn new(subject: impl Into<String>, public_key: [u8; 32]) -> Self {
        Self {
            subject: subject.into(),
            public_key,
        }
    }

    /// Short hex form of the public key, for diagnostics
    pub fn short_key(&self) -> String {
        hex::encode(&self.public_key[..8])
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display_and_order() {
        let a: Endpoint = "10.0.0.2:5000".parse().unwrap();
        let b: Endpoint = "10.0.0.3:4000".parse().unwrap();
        assert_eq!(a.to_string(), "10.0.0.2:5000");
        assert!(a < b);
        assert!("not an endpoint".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("CHACHA20-POLY1305".parse::<CipherAlgorithm>().unwrap(), CipherAlgorithm::ChaCha20Poly1305);
        assert_eq!("aes256-gcm".parse::<CipherAlgorithm>().unwrap(), CipherAlgorithm::Aes256Gcm);
        assert!("des".parse::<CipherAlgorithm>().is_err());
        assert_eq!("SHA-512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_algorithm_info_display() {
        let info = AlgorithmInfo::new(CipherAlgorithm::Aes256Gcm, DigestAlgorithm::Sha256);
        assert_eq!(info.to_string(), "cipher: aes-256-gcm, digest: sha256");
    }
}
