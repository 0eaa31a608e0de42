//! Configuration loading and persistence.
//!
//! Reads and writes the termcast configuration file (`config.json` in
//! the platform config directory) and applies environment variable
//! overrides on load.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::{fs, path::Path};

use crate::constants::{DEFAULT_FRAME_RATE, DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS};
use crate::mux::StreamDefaults;

/// Configuration for the termcast host.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Relay URL for the tunnel polarity.
    pub relay_url: String,
    /// Listen address for the direct-serve polarity.
    pub bind_addr: String,
    /// Default namespace for streams.
    pub namespace: String,
    /// Initial grid width for new sessions.
    pub cols: u16,
    /// Initial grid height for new sessions.
    pub rows: u16,
    /// Largest width a viewer may resize to.
    pub max_cols: u16,
    /// Largest height a viewer may resize to.
    pub max_rows: u16,
    /// Render loop frequency in frames per second.
    pub frame_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "wss://relay.termcast.dev".to_string(),
            bind_addr: "127.0.0.1:7170".to_string(),
            namespace: "default".to_string(),
            cols: 80,
            rows: 24,
            max_cols: DEFAULT_MAX_COLS,
            max_rows: DEFAULT_MAX_ROWS,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if
    /// necessary.
    ///
    /// Directory selection priority:
    /// 1. `TERMCAST_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (e.g. `~/.config/termcast`)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(override_dir) = std::env::var("TERMCAST_CONFIG_DIR") {
            PathBuf::from(override_dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("termcast")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable
    /// overrides. A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from an explicit path, without overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(relay_url) = std::env::var("TERMCAST_RELAY_URL") {
            self.relay_url = relay_url;
        }
        if let Ok(bind_addr) = std::env::var("TERMCAST_BIND_ADDR") {
            self.bind_addr = bind_addr;
        }
        if let Ok(namespace) = std::env::var("TERMCAST_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Ok(frame_rate) = std::env::var("TERMCAST_FRAME_RATE") {
            if let Ok(rate) = frame_rate.parse::<u32>() {
                self.frame_rate = rate.clamp(1, 120);
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        self.save_to(&config_path)
    }

    /// Persists the configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write config {}", path.display()))
    }

    /// Session sizing and pacing derived from this config.
    #[must_use]
    pub fn stream_defaults(&self) -> StreamDefaults {
        StreamDefaults {
            cols: self.cols,
            rows: self.rows,
            max_cols: self.max_cols,
            max_rows: self.max_rows,
            frame_rate: self.frame_rate,
        }
    }
}
