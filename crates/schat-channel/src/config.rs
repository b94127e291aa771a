//! Datagram engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// Largest UDP payload over IPv4
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Timers and limits of the datagram engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// How long a greeting waits for its response
    pub hello_timeout_ms: u64,
    /// Interval between keepalives on established sessions
    pub keepalive_period_ms: u64,
    /// Inbound silence after which a session is lost
    pub session_timeout_ms: u64,
    pub max_datagram_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            hello_timeout_ms: 3_000,
            keepalive_period_ms: 10_000,
            session_timeout_ms: 30_000,
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }
}

impl ChannelConfig {
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    pub fn keepalive_period(&self) -> Duration {
        Duration::from_millis(self.keepalive_period_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hello_timeout_ms == 0 || self.keepalive_period_ms == 0 || self.session_timeout_ms == 0 {
            return Err(ChannelError::Config("channel timeouts must be non-zero".to_string()));
        }
        if self.session_timeout_ms <= self.keepalive_period_ms {
            return Err(ChannelError::Config(
                "channel.session_timeout_ms must exceed channel.keepalive_period_ms".to_string(),
            ));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(ChannelError::Config(format!(
                "channel.max_datagram_size must be between 1 and {}",
                MAX_UDP_PAYLOAD
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ChannelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_session_timeout_must_exceed_keepalive() {
        let config = ChannelConfig {
            keepalive_period_ms: 5_000,
            session_timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
