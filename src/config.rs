//! Server configuration.
//!
//! Ambient convenience only — the wire protocol has no configurable
//! behavior. `from_file`/`to_file`/`validate`, serde + toml, a `Default`
//! impl, scaled down to the two knobs this server actually has: its bind
//! address and its idle-session timeout.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

fn default_bind() -> SocketAddr {
    "0.0.0.0:53".parse().unwrap()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

/// Server configuration, loadable from an optional TOML file and overridable by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// UDP address to listen on.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Seconds of inactivity before a session record is reaped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl TunnelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout_secs == 0 {
            return Err("idle_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}
