// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature sources.
//!
//! The control loop only needs "the current CPU temperature in Celsius".
//! On a Raspberry Pi that comes from `vcgencmd`; elsewhere from the kernel's
//! thermal zone or an hwmon `tempN_input` file.

use crate::config::{SensorConfig, SensorKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const HWMON_ROOT: &str = "/sys/class/hwmon";
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Anything that can report the current temperature.
pub trait TemperatureSource: Send + Sync {
    fn read_celsius(&self) -> io::Result<f64>;

    /// Short description for log messages.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// Sysfs files
// ---------------------------------------------------------------------------

/// A sysfs file holding millidegrees Celsius, e.g. a thermal zone.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemperatureSource for ThermalZone {
    fn read_celsius(&self) -> io::Result<f64> {
        read_millidegrees(&self.path)
    }

    fn describe(&self) -> String {
        format!("thermal zone {}", self.path.display())
    }
}

/// A discovered hwmon temperature sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwmonSensor {
    /// Unique identifier, e.g. "hwmon3/temp1"
    pub id: String,
    /// Human-readable label if available
    pub label: Option<String>,
    /// Absolute path to the `tempN_input` file (millidegrees C)
    pub input_path: PathBuf,
    /// Name of the parent hwmon device
    pub hwmon_name: String,
}

impl TemperatureSource for HwmonSensor {
    fn read_celsius(&self) -> io::Result<f64> {
        read_millidegrees(&self.input_path)
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("hwmon {} ({} {label})", self.id, self.hwmon_name),
            None => format!("hwmon {} ({})", self.id, self.hwmon_name),
        }
    }
}

/// Scan an hwmon root (normally `/sys/class/hwmon`) for temperature inputs.
pub fn discover_hwmon_sensors(root: &Path) -> io::Result<Vec<HwmonSensor>> {
    let mut sensors = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        for n in 1..=32 {
            let input_path = hwmon_dir.join(format!("temp{n}_input"));

            if !input_path.exists() {
                break;
            }

            sensors.push(HwmonSensor {
                id: format!("{hwmon_basename}/temp{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("temp{n}_label"))),
                input_path,
                hwmon_name: hwmon_name.clone(),
            });
        }
    }

    sensors.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sensors)
}

/// Find a single hwmon sensor by id, e.g. "hwmon0/temp1".
pub fn find_hwmon_sensor(root: &Path, id: &str) -> io::Result<HwmonSensor> {
    discover_hwmon_sensors(root)?
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("hwmon sensor {id} not found under {}", root.display()),
            )
        })
}

// ---------------------------------------------------------------------------
// vcgencmd
// ---------------------------------------------------------------------------

/// How long `vcgencmd` may take before it is killed.
pub const VCGENCMD_TIMEOUT: Duration = Duration::from_secs(2);

/// The Raspberry Pi firmware query `vcgencmd measure_temp`.
#[derive(Debug, Clone)]
pub struct Vcgencmd {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Vcgencmd {
    pub fn new() -> Self {
        Self::with_command("vcgencmd", &["measure_temp"], VCGENCMD_TIMEOUT)
    }

    /// Run `program args...` instead, killing it after `timeout`.
    pub fn with_command(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
        }
    }
}

impl Default for Vcgencmd {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureSource for Vcgencmd {
    fn read_celsius(&self) -> io::Result<f64> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "{} did not answer within {}ms",
                        self.describe(),
                        self.timeout.as_millis()
                    ),
                ));
            }
            thread::sleep(Duration::from_millis(20));
        };

        if !status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {status}",
                self.describe()
            )));
        }

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }
        parse_measure_temp(&stdout)
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Parse `temp=45.0'C`.
pub fn parse_measure_temp(output: &str) -> io::Result<f64> {
    let value = output
        .trim()
        .strip_prefix("temp=")
        .map(|s| s.trim_end_matches("'C"))
        .and_then(|s| s.parse::<f64>().ok());

    value.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected measure_temp output: {:?}", output.trim()),
        )
    })
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

/// Tries each source in order and returns the first successful reading.
pub struct SourceChain {
    sources: Vec<Box<dyn TemperatureSource>>,
}

impl SourceChain {
    pub fn new(sources: Vec<Box<dyn TemperatureSource>>) -> Self {
        Self { sources }
    }
}

impl TemperatureSource for SourceChain {
    fn read_celsius(&self) -> io::Result<f64> {
        let mut last_err = None;
        for source in &self.sources {
            match source.read_celsius() {
                Ok(t) => return Ok(t),
                Err(e) => {
                    log::debug!("{} failed: {e}", source.describe());
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no temperature sources configured")
        }))
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.sources.iter().map(|s| s.describe()).collect();
        format!("first of [{}]", parts.join(", "))
    }
}

/// A constant reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedTemperature(pub f64);

impl TemperatureSource for FixedTemperature {
    fn read_celsius(&self) -> io::Result<f64> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        format!("fixed {:.1}C", self.0)
    }
}

/// Build the source selected by the `[sensor]` config section.
pub fn from_config(cfg: &SensorConfig) -> io::Result<Box<dyn TemperatureSource>> {
    let thermal = || Box::new(ThermalZone::new(&cfg.thermal_zone_path)) as Box<dyn TemperatureSource>;

    match cfg.source {
        SensorKind::ThermalZone => Ok(thermal()),
        SensorKind::Vcgencmd => Ok(Box::new(Vcgencmd::new())),
        SensorKind::Hwmon => {
            let id = cfg.hwmon_sensor_id.as_deref().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "sensor.source = \"hwmon\" requires sensor.hwmon_sensor_id",
                )
            })?;
            Ok(Box::new(find_hwmon_sensor(Path::new(HWMON_ROOT), id)?))
        }
        SensorKind::Auto => {
            let mut sources: Vec<Box<dyn TemperatureSource>> = vec![Box::new(Vcgencmd::new())];
            if let Some(id) = cfg.hwmon_sensor_id.as_deref() {
                match find_hwmon_sensor(Path::new(HWMON_ROOT), id) {
                    Ok(sensor) => sources.push(Box::new(sensor)),
                    Err(e) => log::warn!("Skipping hwmon sensor: {e}"),
                }
            }
            sources.push(thermal());
            Ok(Box::new(SourceChain::new(sources)))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_millidegrees(path: &Path) -> io::Result<f64> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse::<i64>()
        .map(|millic| millic as f64 / 1000.0)
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad reading {:?} in {}: {e}", raw.trim(), path.display()),
            )
        })
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
