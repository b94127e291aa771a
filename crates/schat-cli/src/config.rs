//! schat CLI configuration management
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - `~/.schat/config.toml`
//! - `./schat.toml`
//! - the file named by `SCHAT_CONFIG`
//! - environment variables `SCHAT_<SECTION>__<KEY>`

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use schat_channel::ChannelConfig;
use schat_core::{ClientConfig, PolicyConfig};

use crate::error::{CliError, Result};

/// Environment variable naming an extra configuration file
pub const CONFIG_PATH_ENV: &str = "SCHAT_CONFIG";

const ENV_PREFIX: &str = "SCHAT_";
const LOCAL_CONFIG_FILE: &str = "schat.toml";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the schat client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchatConfig {
    /// Reactor, input and shutdown settings
    pub client: ClientConfig,

    /// Accept/reject overrides for incoming protocol events
    pub policy: PolicyConfig,

    /// Datagram engine timings and limits
    pub channel: ChannelConfig,

    /// Diagnostic logging
    pub log: LogConfig,
}

/// Diagnostic log settings. Chat output never goes through the logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level
            .parse()
            .map_err(|_| CliError::Config(format!("unknown log level: {}", self.level)))
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading
// ----------------------------------------------------------------------------

impl SchatConfig {
    /// Load and validate the layered configuration
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Load defaults overlaid with a single file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));
        Self::from_figment(figment)
    }

    /// The provider stack used by [`SchatConfig::load`]
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = Self::user_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Toml::file(LOCAL_CONFIG_FILE));
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(PathBuf::from(path)));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: SchatConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.schat/config.toml`, when a home directory is known
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".schat").join("config.toml"))
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.channel.validate()?;
        self.log.level_filter()?;
        Ok(())
    }
}
