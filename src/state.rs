// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The shared control-state document.
//!
//! `{"mode": "<auto|manual|silent|normal|performance>", "target_pwm": <int|null>}`
//! is the only channel between the operator tool, the auto service and the
//! actuator process. Unknown modes are mapped to [`ControlMode::Auto`] here,
//! at the parsing boundary, so nothing downstream handles them.

use crate::curve::clamp_duty;
use crate::store::{Defaulted, Document, JsonStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How the commanded duty is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Follow the fan curve.
    #[default]
    Auto,
    /// Operator-supplied duty.
    Manual,
    Silent,
    Normal,
    Performance,
}

impl ControlMode {
    pub const ALL: [ControlMode; 5] = [
        ControlMode::Auto,
        ControlMode::Manual,
        ControlMode::Silent,
        ControlMode::Normal,
        ControlMode::Performance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Auto => "auto",
            ControlMode::Manual => "manual",
            ControlMode::Silent => "silent",
            ControlMode::Normal => "normal",
            ControlMode::Performance => "performance",
        }
    }

    /// Parse a mode read from the shared document. Anything unrecognised
    /// falls back to `Auto`.
    fn from_document(value: &Value) -> Self {
        match value {
            Value::Null => ControlMode::Auto,
            Value::String(s) => s.parse().unwrap_or_else(|_| {
                log::warn!("Unexpected mode '{s}' in control state, treating as auto");
                ControlMode::Auto
            }),
            other => {
                log::warn!("Unexpected mode value {other} in control state, treating as auto");
                ControlMode::Auto
            }
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                format!("unknown mode '{s}' (expected auto, manual, silent, normal or performance)")
            })
    }
}

/// Current mode and the duty the actuator should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "StateRecord")]
pub struct ControlState {
    pub mode: ControlMode,
    #[serde(rename = "target_pwm")]
    pub target_duty: Option<u8>,
}

impl ControlState {
    pub fn new(mode: ControlMode, target_duty: Option<u8>) -> Self {
        Self { mode, target_duty }
    }
}

impl Document for ControlState {
    const KIND: &'static str = "control state";

    fn fallback() -> Self {
        ControlState::default()
    }
}

#[derive(Deserialize)]
struct StateRecord {
    #[serde(default)]
    mode: Value,
    #[serde(default)]
    target_pwm: Value,
}

impl From<StateRecord> for ControlState {
    fn from(record: StateRecord) -> Self {
        let target_duty = match &record.target_pwm {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .map(clamp_duty),
            _ => None,
        };
        ControlState {
            mode: ControlMode::from_document(&record.mode),
            target_duty,
        }
    }
}

/// Read/write access to the control-state document.
#[derive(Debug, Clone)]
pub struct ControlStateSync {
    store: JsonStore<ControlState>,
}

impl ControlStateSync {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Current state; `{auto, null}` when the document is missing or malformed.
    pub fn read(&self) -> ControlState {
        self.store.load_or_default()
    }

    /// Like [`read`](Self::read), but reports why a default was substituted.
    pub fn load(&self) -> Result<ControlState, Defaulted<ControlState>> {
        self.store.load()
    }

    pub fn write(&self, state: &ControlState) -> io::Result<()> {
        self.store.save(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DefaultReason;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn sync_in(dir: &TempDir) -> ControlStateSync {
        ControlStateSync::new(dir.path().join("fan_state.json"))
    }

    #[test]
    fn test_mode_round_trips_through_strings() {
        for mode in ControlMode::ALL {
            assert_eq!(mode.to_string().parse::<ControlMode>(), Ok(mode));
        }
        assert!("turbo".parse::<ControlMode>().is_err());
    }

    #[test]
    fn test_document_field_names() {
        let state = ControlState::new(ControlMode::Manual, Some(200));
        assert_eq!(
            serde_json::to_value(state).unwrap(),
            json!({"mode": "manual", "target_pwm": 200})
        );
        assert_eq!(
            serde_json::to_value(ControlState::default()).unwrap(),
            json!({"mode": "auto", "target_pwm": null})
        );
    }

    #[test]
    fn test_unknown_mode_parses_as_auto() {
        let state: ControlState =
            serde_json::from_value(json!({"mode": "bogus_mode", "target_pwm": 90})).unwrap();
        assert_eq!(state, ControlState::new(ControlMode::Auto, Some(90)));

        let state: ControlState = serde_json::from_value(json!({"mode": 3})).unwrap();
        assert_eq!(state.mode, ControlMode::Auto);
    }

    #[test]
    fn test_target_is_clamped_or_nulled() {
        let state: ControlState =
            serde_json::from_value(json!({"mode": "manual", "target_pwm": 999})).unwrap();
        assert_eq!(state.target_duty, Some(255));

        let state: ControlState =
            serde_json::from_value(json!({"mode": "manual", "target_pwm": "fast"})).unwrap();
        assert_eq!(state.target_duty, None);
    }

    #[test]
    fn test_missing_document_defaults() {
        let dir = TempDir::new().unwrap();
        let sync = sync_in(&dir);
        assert_eq!(sync.read(), ControlState::new(ControlMode::Auto, None));
        assert_eq!(sync.load().unwrap_err().reason, DefaultReason::Missing);
    }

    #[test]
    fn test_non_object_document_defaults() {
        let dir = TempDir::new().unwrap();
        let sync = sync_in(&dir);
        fs::write(sync.path(), "\"manual\"").unwrap();
        assert_eq!(sync.read(), ControlState::default());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let sync = sync_in(&dir);
        for mode in ControlMode::ALL {
            for target in [None, Some(0), Some(77), Some(255)] {
                let state = ControlState::new(mode, target);
                sync.write(&state).unwrap();
                assert_eq!(sync.read(), state);
            }
        }
    }
}
