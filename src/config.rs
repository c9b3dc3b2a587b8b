//! Configuration management for gpuwatch
//!
//! This module provides TOML persistence for the server, sampler and
//! engine settings. A missing file is not an error: defaults apply.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// gpuwatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server options
    #[serde(default)]
    pub server: ServerConfig,
    /// nvidia-smi invocation options
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Temperature history options
    #[serde(default)]
    pub history: HistoryConfig,
    /// Stress-test detector options
    #[serde(default)]
    pub stress: StressConfig,
    /// Process list options
    #[serde(default)]
    pub processes: ProcessConfig,
    /// Per-device state retention
    #[serde(default)]
    pub devices: DeviceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sample on a timer instead of per request (milliseconds)
    #[serde(default)]
    pub background_interval_ms: Option<u64>,
}

/// nvidia-smi invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Binary name or path
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Kill the tool after this many milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// Temperature history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Samples kept per device
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Rate-of-change lookback in seconds
    #[serde(default = "default_window")]
    pub window_secs: f64,
}

/// Stress-test detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    /// Process name substring that marks a stress run
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Absent cycles tolerated before a run ends
    #[serde(default)]
    pub grace_cycles: u32,
}

/// Process list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Name substrings hidden from the published list
    #[serde(default = "default_hidden_names")]
    pub hidden_names: Vec<String>,
}

/// Per-device state retention
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Drop history and peak after this many absent cycles (0 = never)
    #[serde(default)]
    pub evict_after_cycles: u32,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_binary() -> String {
    "nvidia-smi".to_string()
}

fn default_timeout() -> u64 {
    5000
}

fn default_capacity() -> usize {
    40 // 10 seconds at 250ms
}

fn default_window() -> f64 {
    10.0
}

fn default_marker() -> String {
    "gpu-burn".to_string()
}

fn default_hidden_names() -> Vec<String> {
    vec!["xorg".to_string(), "shell".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            background_interval_ms: None,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window(),
        }
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            grace_cycles: 0,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            hidden_names: default_hidden_names(),
        }
    }
}

/// Dashboard's fastest polling rate; background sampling may not go below it
pub const MIN_BACKGROUND_INTERVAL_MS: u64 = 250;

impl Config {
    /// Get the default configuration directory
    ///
    /// Returns `~/.config/gpuwatch` on Unix-like systems,
    /// or `%APPDATA%\gpuwatch` on Windows.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(windows) {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from(".config"))
        };

        Ok(config_dir.join("gpuwatch"))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_file = Self::default_path()?.join("config.toml");

        if !config_file.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&config_file)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::default_path()?;
        std::fs::create_dir_all(&config_dir)?;

        let config_file = config_dir.join("config.toml");
        self.save_to(&config_file)?;
        Ok(config_file)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.history.capacity < 2 {
            return Err(Error::Config(format!(
                "history.capacity must be at least 2, got {}",
                self.history.capacity
            )));
        }
        if !(self.history.window_secs > 0.0) {
            return Err(Error::Config(format!(
                "history.window_secs must be positive, got {}",
                self.history.window_secs
            )));
        }
        if self.sampler.timeout_ms == 0 {
            return Err(Error::Config("sampler.timeout_ms must be positive".to_string()));
        }
        if self.sampler.binary.trim().is_empty() {
            return Err(Error::Config("sampler.binary must not be empty".to_string()));
        }
        if self.stress.marker.trim().is_empty() {
            return Err(Error::Config("stress.marker must not be empty".to_string()));
        }
        if let Some(ms) = self.server.background_interval_ms {
            if ms < MIN_BACKGROUND_INTERVAL_MS {
                return Err(Error::Config(format!(
                    "server.background_interval_ms must be at least {}, got {}",
                    MIN_BACKGROUND_INTERVAL_MS, ms
                )));
            }
        }
        Ok(())
    }
}
