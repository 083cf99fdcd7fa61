//! Configuration management for the server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Structured-data root the JSON tools are sandboxed to (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Generated-site root the file tools are sandboxed to (default: ./public)
    #[serde(default = "default_site_dir")]
    pub site_dir: PathBuf,

    /// Per-turn deadline in seconds. Unset leaves the agent capability's own
    /// deadline in charge.
    #[serde(default)]
    pub turn_timeout_secs: Option<u64>,

    /// CORS allowed origins (comma-separated). If empty, any origin is
    /// allowed (dev mode).
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_site_dir() -> PathBuf {
    PathBuf::from("./public")
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("PAGESMITH_HOST").unwrap_or_else(|_| default_host());
        let port = std::env::var("PAGESMITH_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_port);
        let data_dir = std::env::var("PAGESMITH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        let site_dir = std::env::var("PAGESMITH_SITE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_site_dir());
        let turn_timeout_secs = std::env::var("PAGESMITH_TURN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok());
        let cors_allowed_origins = std::env::var("PAGESMITH_CORS_ALLOWED_ORIGINS").ok();

        Ok(Self {
            host,
            port,
            data_dir,
            site_dir,
            turn_timeout_secs,
            cors_allowed_origins,
        })
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Turn deadline as a duration, when configured.
    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            site_dir: default_site_dir(),
            turn_timeout_secs: None,
            cors_allowed_origins: None,
        }
    }
}
