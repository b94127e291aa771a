//! Error types for the datagram engine

use schat_core::OperationError;

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid signature")]
    Signature,

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML writing error: {0}")]
    TomlWriting(#[from] toml::ser::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

impl ChannelError {
    pub fn crypto(msg: impl Into<String>) -> Self {
        ChannelError::Crypto(msg.into())
    }

    pub fn identity(msg: impl Into<String>) -> Self {
        ChannelError::Identity(msg.into())
    }
}

impl From<ChannelError> for OperationError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Io(e) => OperationError::Io(e.to_string()),
            ChannelError::Signature => OperationError::Crypto("invalid signature".to_string()),
            other => OperationError::Crypto(other.to_string()),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = core::result::Result<T, ChannelError>;
