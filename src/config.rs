// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Where the shared documents live, how often the auto service polls, and
//! which temperature source to read. Default path: `/etc/fanctl/config.toml`

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fanctl/config.toml";

/// Default control-state document.
pub const DEFAULT_STATE_PATH: &str = "/var/lib/fanctl/fan_state.json";

/// Default curve document.
pub const DEFAULT_CURVE_PATH: &str = "/var/lib/fanctl/fan_curve.json";

/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default sleep slice in milliseconds; bounds how long `stop()` waits.
pub const DEFAULT_SLEEP_SLICE_MS: u64 = 100;

/// Default bound on joining the loop thread, in milliseconds.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Auto service timing.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Document locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Temperature source selection.
    #[serde(default)]
    pub sensor: SensorConfig,
}

/// Auto service timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Period of the auto loop, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Granularity of the loop's sleep, in milliseconds.
    #[serde(default = "default_sleep_slice")]
    pub sleep_slice_ms: u64,

    /// How long `stop()` waits for the loop thread, in milliseconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            sleep_slice_ms: DEFAULT_SLEEP_SLICE_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sleep_slice(&self) -> Duration {
        Duration::from_millis(self.sleep_slice_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Locations of the two shared documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    #[serde(default = "default_curve_path")]
    pub curve_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            curve_path: default_curve_path(),
        }
    }
}

/// Which temperature source to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// vcgencmd, then the configured hwmon sensor, then the thermal zone.
    #[default]
    Auto,
    ThermalZone,
    Hwmon,
    Vcgencmd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default)]
    pub source: SensorKind,

    #[serde(default = "default_thermal_zone")]
    pub thermal_zone_path: PathBuf,

    /// hwmon sensor id such as "hwmon0/temp1".
    #[serde(default)]
    pub hwmon_sensor_id: Option<String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            source: SensorKind::default(),
            thermal_zone_path: default_thermal_zone(),
            hwmon_sensor_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load the config at `path`, logging and falling back to defaults on error.
pub fn load_config_or_default(path: &Path) -> Config {
    load_config(path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    })
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_sleep_slice() -> u64 {
    DEFAULT_SLEEP_SLICE_MS
}

fn default_stop_timeout() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_curve_path() -> PathBuf {
    PathBuf::from(DEFAULT_CURVE_PATH)
}

fn default_thermal_zone() -> PathBuf {
    PathBuf::from(crate::sensor::DEFAULT_THERMAL_ZONE)
}
