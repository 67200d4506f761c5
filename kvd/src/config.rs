//! Configuration parsing from the end user.
//!
//! Grounded in `lading::config::Config`: a top-level `#[serde(deny_unknown_fields)]`
//! struct loaded from YAML, with `thiserror` wrapping the handful of ways
//! parsing can fail.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Errors produced while loading a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("failed to parse bind address: {0}")]
    SocketAddr(#[from] std::net::AddrParseError),
}

/// Top-level configuration for the `kvd` server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the TCP listener binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Path to the on-disk snapshot file.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// How often the background timer flushes a dirty store to disk.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// How often the background timer logs GET/SET counters.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// How long a connection may sit with no traffic before it is closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            snapshot_path: default_snapshot_path(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("config.dat")
}

fn default_snapshot_interval_secs() -> u64 {
    10
}

fn default_stats_interval_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from a YAML file on disk.
    pub fn from_path(path: &std::path::Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Parse [`Config::bind`] into a [`SocketAddr`], applying CLI overrides
    /// first if one was given.
    pub fn bind_addr(&self, override_bind: Option<&str>) -> Result<SocketAddr, Error> {
        let raw = override_bind.unwrap_or(&self.bind);
        Ok(raw.parse()?)
    }
}
