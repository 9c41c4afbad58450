//! Runtime configuration
//!
//! Defaults, overridden by environment variables, overridden by CLI flags.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::sync::DEFAULT_CHANNEL;

// Environment variable names
const ENV_DB: &str = "NOTEPAD_DB";
const ENV_CHANNEL: &str = "NOTEPAD_CHANNEL";
const ENV_RELAY: &str = "NOTEPAD_RELAY";

pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:9820";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub channel: String,
    pub relay_addr: SocketAddr,
}

impl Config {
    /// Defaults plus whatever the environment overrides.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = match lookup(ENV_DB).filter(|v| !v.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let channel = lookup(ENV_CHANNEL)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        let relay = lookup(ENV_RELAY).unwrap_or_else(|| DEFAULT_RELAY_ADDR.to_string());
        let relay_addr = parse_addr(&relay).with_context(|| format!("invalid {}", ENV_RELAY))?;

        Ok(Self {
            db_path,
            channel,
            relay_addr,
        })
    }

    pub fn with_db_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.db_path = path;
        }
        self
    }

    pub fn with_relay(mut self, addr: Option<SocketAddr>) -> Self {
        if let Some(addr) = addr {
            self.relay_addr = addr;
        }
        self
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
    Ok(config_dir.join("notepad").join("notes.db"))
}

fn parse_addr(s: &str) -> Result<SocketAddr> {
    s.trim()
        .parse()
        .with_context(|| format!("'{}' is not a socket address like {}", s, DEFAULT_RELAY_ADDR))
}
