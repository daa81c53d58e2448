// src/config/mod.rs - Host configuration
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration structure, loaded from `spooler.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub spool: SpoolConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Spool directory layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpoolConfig {
    #[serde(default = "default_spool_dir")]
    pub dir: PathBuf,
}

/// Device backend selection and pen parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Driver backend; only "sim" ships with the host, hardware drivers
    /// plug in behind the driver trait.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Full pen speed in mm/s, the basis for time estimates.
    #[serde(default = "default_pen_speed")]
    pub pen_speed_mm_s: f64,

    /// Wall-clock factor applied to simulated plots (0 = instant).
    #[serde(default)]
    pub sim_time_scale: f64,

    #[serde(default = "default_pen_rate")]
    pub pen_up_percent: u32,

    #[serde(default = "default_pen_rate")]
    pub pen_down_percent: u32,
}

/// Spooling policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Offer to plot a finished job again before closing it out.
    #[serde(default)]
    pub repeat_jobs: bool,

    /// Rebuild the waiting queue from the spool directory on startup.
    #[serde(default = "default_true")]
    pub resume_on_start: bool,
}

// Default value functions
fn default_spool_dir() -> PathBuf { PathBuf::from("spool") }
fn default_backend() -> String { "sim".to_string() }
fn default_pen_speed() -> f64 { 50.0 }
fn default_pen_rate() -> u32 { 100 }
fn default_true() -> bool { true }

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            dir: default_spool_dir(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            pen_speed_mm_s: default_pen_speed(),
            sim_time_scale: 0.0,
            pen_up_percent: default_pen_rate(),
            pen_down_percent: default_pen_rate(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            repeat_jobs: false,
            resume_on_start: default_true(),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}
