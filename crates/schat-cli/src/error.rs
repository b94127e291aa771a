//! Error handling for the schat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] schat_core::SchatError),

    #[error(transparent)]
    Channel(#[from] schat_channel::ChannelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot resolve listen address {0}")]
    Resolve(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
