//! schat command-line client
//!
//! Argument parsing, layered configuration and error types for the `schat`
//! and `schat-keygen` binaries.

pub mod cli;
pub mod config;
pub mod error;

pub use cli::{Cli, KeygenCli};
pub use config::{LogConfig, SchatConfig};
pub use error::{CliError, Result};
