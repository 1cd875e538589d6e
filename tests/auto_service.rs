// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! End-to-end behaviour of the auto service against real documents on disk.

use pi_fan_control::curve::{CurvePoint, CurveStore, FanCurve};
use pi_fan_control::mode::ModeResolver;
use pi_fan_control::sensor::TemperatureSource;
use pi_fan_control::service::{AutoControlService, ServiceTiming};
use pi_fan_control::state::{ControlMode, ControlState, ControlStateSync};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(25);

/// A temperature the test can change while the service runs.
#[derive(Clone)]
struct Dial(Arc<AtomicU64>);

impl Dial {
    fn new(temp_c: f64) -> Self {
        Dial(Arc::new(AtomicU64::new(temp_c.to_bits())))
    }

    fn set(&self, temp_c: f64) {
        self.0.store(temp_c.to_bits(), Ordering::SeqCst);
    }
}

impl TemperatureSource for Dial {
    fn read_celsius(&self) -> io::Result<f64> {
        Ok(f64::from_bits(self.0.load(Ordering::SeqCst)))
    }

    fn describe(&self) -> String {
        "test dial".to_string()
    }
}

struct Rig {
    _dir: TempDir,
    state: ControlStateSync,
    curve: CurveStore,
    dial: Dial,
    service: AutoControlService,
}

fn rig(initial: Option<ControlState>, temp_c: f64) -> Rig {
    let dir = TempDir::new().unwrap();
    let state = ControlStateSync::new(dir.path().join("fan_state.json"));
    let curve = CurveStore::new(dir.path().join("fan_curve.json"));
    curve
        .save(&FanCurve::new(vec![
            CurvePoint::new(40.0, 100),
            CurvePoint::new(60.0, 150),
            CurvePoint::new(80.0, 255),
        ]))
        .unwrap();
    if let Some(s) = initial {
        state.write(&s).unwrap();
    }

    let dial = Dial::new(temp_c);
    let service = AutoControlService::new(
        ModeResolver::new(curve.clone(), state.clone()),
        Box::new(dial.clone()),
        ServiceTiming {
            poll_interval: POLL,
            sleep_slice: Duration::from_millis(5),
            stop_timeout: Duration::from_secs(2),
        },
    );

    Rig {
        _dir: dir,
        state,
        curve,
        dial,
        service,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn inode(sync: &ControlStateSync) -> u64 {
    fs::metadata(sync.path()).unwrap().ino()
}

#[test]
fn manual_mode_is_never_overwritten() {
    let initial = ControlState::new(ControlMode::Manual, Some(200));
    let rig = rig(Some(initial), 75.0);
    let before = inode(&rig.state);

    rig.service.start().unwrap();
    thread::sleep(POLL * 8);
    rig.service.stop().unwrap();

    assert_eq!(rig.state.read(), initial);
    assert_eq!(inode(&rig.state), before);
}

#[test]
fn preset_modes_are_left_alone() {
    let initial = ControlState::new(ControlMode::Silent, Some(77));
    let rig = rig(Some(initial), 90.0);

    rig.service.start().unwrap();
    thread::sleep(POLL * 5);
    rig.service.stop().unwrap();

    assert_eq!(rig.state.read(), initial);
}

#[test]
fn auto_converges_then_stops_writing() {
    let rig = rig(Some(ControlState::new(ControlMode::Manual, Some(10))), 50.0);
    rig.service.start().unwrap();

    rig.state
        .write(&ControlState::new(ControlMode::Auto, Some(10)))
        .unwrap();
    assert!(wait_for(|| rig.state.read().target_duty == Some(125)));

    let settled = inode(&rig.state);
    thread::sleep(POLL * 6);
    assert_eq!(inode(&rig.state), settled);
    assert_eq!(rig.state.read(), ControlState::new(ControlMode::Auto, Some(125)));

    rig.service.stop().unwrap();
}

#[test]
fn auto_tracks_temperature_and_curve_edits() {
    let rig = rig(None, 30.0);
    rig.service.start().unwrap();
    assert!(wait_for(|| rig.state.read().target_duty == Some(100)));

    rig.dial.set(90.0);
    assert!(wait_for(|| rig.state.read().target_duty == Some(255)));

    // Curve edits are picked up without restarting.
    rig.curve.add_point(90.0, 180).unwrap();
    assert!(wait_for(|| rig.state.read().target_duty == Some(180)));

    rig.service.stop().unwrap();
}

#[test]
fn operator_takeover_is_respected() {
    let rig = rig(None, 50.0);
    rig.service.start().unwrap();
    assert!(wait_for(|| rig.state.read().target_duty == Some(125)));

    let takeover = ControlState::new(ControlMode::Performance, Some(255));
    rig.state.write(&takeover).unwrap();
    // Let any tick that read the old state finish before the temperature moves.
    thread::sleep(POLL * 3);
    rig.dial.set(40.0);
    thread::sleep(POLL * 5);
    assert_eq!(rig.state.read(), takeover);

    rig.state
        .write(&ControlState::new(ControlMode::Auto, Some(255)))
        .unwrap();
    assert!(wait_for(|| rig.state.read().target_duty == Some(100)));

    rig.service.stop().unwrap();
}

#[test]
fn corrupt_state_document_recovers_as_auto() {
    let rig = rig(None, 60.0);
    fs::write(rig.state.path(), "{\"mode\": \"auto\", \"target_pwm\":").unwrap();

    rig.service.start().unwrap();
    assert!(wait_for(|| rig.state.read() == ControlState::new(ControlMode::Auto, Some(150))));
    rig.service.stop().unwrap();

    let raw = fs::read_to_string(rig.state.path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value, serde_json::json!({"mode": "auto", "target_pwm": 150}));
}
