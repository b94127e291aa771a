//! Wire frames exchanged between engines
//!
//! One frame per UDP datagram, bincode-encoded.

use serde::{Deserialize, Serialize};

use schat_core::{ChannelNumber, CipherAlgorithm, DigestAlgorithm};

use crate::error::Result;

/// Identifies one directional session between two engines
pub type SessionNumber = u32;

/// Frame carried in one datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    HelloRequest {
        unique: u64,
    },
    HelloResponse {
        unique: u64,
    },
    Presentation {
        subject: String,
        public_key: [u8; 32],
    },
    SessionRequest {
        session_number: SessionNumber,
        ciphers: Vec<CipherAlgorithm>,
        digest: DigestAlgorithm,
        ephemeral: [u8; 32],
        signature: Vec<u8>,
    },
    Session {
        session_number: SessionNumber,
        cipher: CipherAlgorithm,
        digest: DigestAlgorithm,
        ephemeral: [u8; 32],
        signature: Vec<u8>,
    },
    Data {
        session_number: SessionNumber,
        sequence: u64,
        channel: ChannelNumber,
        ciphertext: Vec<u8>,
    },
    KeepAlive {
        session_number: SessionNumber,
        sequence: u64,
        ciphertext: Vec<u8>,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Frame name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Frame::HelloRequest { .. } => "HELLO",
            Frame::HelloResponse { .. } => "HELLO_RESPONSE",
            Frame::Presentation { .. } => "PRESENTATION",
            Frame::SessionRequest { .. } => "SESSION_REQUEST",
            Frame::Session { .. } => "SESSION",
            Frame::Data { .. } => "DATA",
            Frame::KeepAlive { .. } => "KEEP_ALIVE",
        }
    }
}
