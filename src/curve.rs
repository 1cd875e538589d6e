// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps temperature readings to PWM duty values (0-255).
//! Points are linearly interpolated between defined thresholds and the
//! curve is never empty. On disk it is stored as
//! `{"points": [{"temp": <int>, "pwm": <int>}, ...]}`.

use crate::store::{Document, JsonStore};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};

/// Highest PWM duty value.
pub const MAX_DUTY: u8 = 255;

/// Point reinstated when the last point of a curve is removed.
pub const FALLBACK_POINT: CurvePoint = CurvePoint {
    temp_c: 40.0,
    pwm: 100,
};

/// Whole-degree temperature of a curve point. NaN and infinities have no
/// place on the curve and are rejected.
fn curve_temperature(temp_c: f64) -> io::Result<f64> {
    if temp_c.is_finite() {
        Ok(temp_c.trunc())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("curve temperature must be a finite number, got {temp_c}"),
        ))
    }
}

/// Parse a command-line temperature, refusing NaN and infinities.
pub fn parse_temperature(arg: &str) -> Result<f64, String> {
    let temp_c: f64 = arg
        .trim()
        .parse()
        .map_err(|e| format!("invalid temperature '{arg}': {e}"))?;
    if temp_c.is_finite() {
        Ok(temp_c)
    } else {
        Err(format!("temperature must be a finite number, got '{arg}'"))
    }
}

/// Clamp an arbitrary integer into the PWM range.
pub fn clamp_duty(value: i64) -> u8 {
    value.clamp(0, MAX_DUTY as i64) as u8
}

/// A single point on a fan curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Temperature in whole degrees Celsius
    pub temp_c: f64,
    /// PWM duty value (0-255)
    pub pwm: u8,
}

impl CurvePoint {
    pub fn new(temp_c: f64, pwm: i64) -> Self {
        Self {
            temp_c: temp_c.trunc(),
            pwm: clamp_duty(pwm),
        }
    }
}

impl Serialize for CurvePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut point = serializer.serialize_struct("CurvePoint", 2)?;
        point.serialize_field("temp", &(self.temp_c as i64))?;
        point.serialize_field("pwm", &self.pwm)?;
        point.end()
    }
}

/// An ordered list of temperature-to-PWM points with unique temperatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveRecord")]
pub struct FanCurve {
    points: Vec<CurvePoint>,
}

impl FanCurve {
    /// Create a curve. Points are sorted by temperature and duplicate
    /// temperatures collapse to the last occurrence. Points whose
    /// temperature is NaN or infinite are dropped. An empty list yields
    /// the single fallback point.
    pub fn new(points: Vec<CurvePoint>) -> Self {
        let mut curve = Self { points: Vec::new() };
        for p in points {
            if p.temp_c.is_finite() {
                curve.upsert(p);
            } else {
                log::warn!("Dropping curve point with temperature {}", p.temp_c);
            }
        }
        if curve.points.is_empty() {
            curve.points.push(FALLBACK_POINT);
        }
        curve
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Interpolate the PWM value for a given temperature.
    ///
    /// - Below the lowest point: returns the lowest point's PWM
    /// - Above the highest point: returns the highest point's PWM
    /// - Between two points: linear interpolation, truncated
    pub fn interpolate(&self, temp_c: f64) -> u8 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0;
        };
        if temp_c <= first.temp_c {
            return first.pwm;
        }
        if temp_c >= last.temp_c {
            return last.pwm;
        }

        for window in self.points.windows(2) {
            let lo = &window[0];
            let hi = &window[1];

            if temp_c >= lo.temp_c && temp_c <= hi.temp_c {
                let range_t = hi.temp_c - lo.temp_c;
                if range_t == 0.0 {
                    return lo.pwm;
                }
                let frac = (temp_c - lo.temp_c) / range_t;
                let pwm_f = lo.pwm as f64 + frac * (hi.pwm as f64 - lo.pwm as f64);
                return pwm_f.trunc().clamp(0.0, MAX_DUTY as f64) as u8;
            }
        }

        last.pwm
    }

    /// Set the duty at `temp_c`, overwriting an existing point at that
    /// temperature or inserting a new one in order.
    pub fn add_point(&mut self, temp_c: f64, pwm: i64) -> io::Result<()> {
        let temp_c = curve_temperature(temp_c)?;
        self.upsert(CurvePoint::new(temp_c, pwm));
        Ok(())
    }

    /// Remove every point at `temp_c`. Returns how many were removed.
    /// Removing the last point reinstates [`FALLBACK_POINT`].
    pub fn remove_point(&mut self, temp_c: f64) -> io::Result<usize> {
        let temp_c = curve_temperature(temp_c)?;
        let before = self.points.len();
        self.points.retain(|p| p.temp_c != temp_c);
        let removed = before - self.points.len();
        if self.points.is_empty() {
            self.points.push(FALLBACK_POINT);
        }
        Ok(removed)
    }

    fn upsert(&mut self, point: CurvePoint) {
        if let Some(existing) = self.points.iter_mut().find(|p| p.temp_c == point.temp_c) {
            existing.pwm = point.pwm;
        } else {
            self.points.push(point);
            self.points.sort_by(|a, b| a.temp_c.total_cmp(&b.temp_c));
        }
    }
}

impl Default for FanCurve {
    fn default() -> Self {
        default_curve()
    }
}

/// The curve used when no curve document exists or it cannot be parsed.
pub fn default_curve() -> FanCurve {
    FanCurve::new(vec![
        CurvePoint { temp_c: 40.0, pwm: 100 },
        CurvePoint { temp_c: 50.0, pwm: 100 },
        CurvePoint { temp_c: 60.0, pwm: 100 },
        CurvePoint { temp_c: 70.0, pwm: 63 },
        CurvePoint { temp_c: 80.0, pwm: 81 },
    ])
}

impl Document for FanCurve {
    const KIND: &'static str = "fan curve";

    fn fallback() -> Self {
        default_curve()
    }
}

// ---------------------------------------------------------------------------
// Lenient on-disk representation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CurveRecord {
    #[serde(default)]
    points: Option<Vec<PointRecord>>,
}

#[derive(Deserialize)]
struct PointRecord {
    #[serde(default)]
    temp: Value,
    #[serde(default)]
    pwm: Value,
}

impl TryFrom<CurveRecord> for FanCurve {
    type Error = String;

    fn try_from(record: CurveRecord) -> Result<Self, Self::Error> {
        let points: Vec<CurvePoint> = record
            .points
            .unwrap_or_default()
            .iter()
            .map(|p| CurvePoint::new(whole_number(&p.temp) as f64, whole_number(&p.pwm)))
            .collect();

        if points.is_empty() {
            return Err("curve document has no points".to_string());
        }
        Ok(FanCurve::new(points))
    }
}

/// Coerce a JSON value to a whole number; anything unusable becomes 0.
fn whole_number(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Durable curve
// ---------------------------------------------------------------------------

/// The fan curve as stored on disk. Every call reloads the document, and
/// every mutation is persisted before it returns.
#[derive(Debug, Clone)]
pub struct CurveStore {
    store: JsonStore<FanCurve>,
}

impl CurveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Current curve, or the default curve if the document is unusable.
    pub fn load(&self) -> FanCurve {
        self.store.load_or_default()
    }

    pub fn interpolate(&self, temp_c: f64) -> u8 {
        self.load().interpolate(temp_c)
    }

    pub fn add_point(&self, temp_c: f64, pwm: i64) -> io::Result<FanCurve> {
        let mut curve = self.load();
        curve.add_point(temp_c, pwm)?;
        self.store.save(&curve)?;
        log::info!("Curve point {}C -> PWM {} saved", temp_c.trunc(), clamp_duty(pwm));
        Ok(curve)
    }

    pub fn remove_point(&self, temp_c: f64) -> io::Result<FanCurve> {
        let mut curve = self.load();
        let removed = curve.remove_point(temp_c)?;
        self.store.save(&curve)?;
        log::info!("Removed {removed} curve point(s) at {}C", temp_c.trunc());
        Ok(curve)
    }

    /// Replace the stored curve wholesale.
    pub fn save(&self, curve: &FanCurve) -> io::Result<()> {
        self.store.save(curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn three_point_curve() -> FanCurve {
        FanCurve::new(vec![
            CurvePoint::new(40.0, 100),
            CurvePoint::new(60.0, 150),
            CurvePoint::new(80.0, 255),
        ])
    }

    #[test]
    fn test_interpolation_midpoint() {
        assert_eq!(three_point_curve().interpolate(50.0), 125);
    }

    #[test]
    fn test_interpolation_below_range() {
        assert_eq!(three_point_curve().interpolate(30.0), 100);
    }

    #[test]
    fn test_interpolation_above_range() {
        assert_eq!(three_point_curve().interpolate(90.0), 255);
    }

    #[test]
    fn test_interpolation_exact_point() {
        assert_eq!(three_point_curve().interpolate(60.0), 150);
    }

    #[test]
    fn test_interpolation_truncates() {
        // 100 + 0.25 * 50 = 112.5
        assert_eq!(three_point_curve().interpolate(45.0), 112);
        // falling segment: 100 + 0.5 * (63 - 100) = 81.5
        assert_eq!(default_curve().interpolate(65.0), 81);
    }

    #[test]
    fn test_single_point_curve() {
        let curve = FanCurve::new(vec![CurvePoint::new(50.0, 90)]);
        assert_eq!(curve.interpolate(10.0), 90);
        assert_eq!(curve.interpolate(99.0), 90);
    }

    #[test]
    fn test_add_point_overwrites_same_temperature() {
        let mut curve = three_point_curve();
        curve.add_point(60.0, 10).unwrap();
        curve.add_point(60.0, 20).unwrap();
        let at_60: Vec<_> = curve.points().iter().filter(|p| p.temp_c == 60.0).collect();
        assert_eq!(at_60.len(), 1);
        assert_eq!(at_60[0].pwm, 20);
        assert_eq!(curve.points().len(), 3);
    }

    #[test]
    fn test_add_point_keeps_order_and_clamps() {
        let mut curve = three_point_curve();
        curve.add_point(50.0, 400).unwrap();
        curve.add_point(20.0, -5).unwrap();
        let temps: Vec<f64> = curve.points().iter().map(|p| p.temp_c).collect();
        assert_eq!(temps, vec![20.0, 40.0, 50.0, 60.0, 80.0]);
        assert_eq!(curve.points()[0].pwm, 0);
        assert_eq!(curve.points()[2].pwm, 255);
    }

    #[test]
    fn test_remove_last_point_reinstates_fallback() {
        let mut curve = FanCurve::new(vec![CurvePoint::new(55.0, 200)]);
        assert_eq!(curve.remove_point(55.0).unwrap(), 1);
        assert_eq!(curve.points(), &[FALLBACK_POINT]);
    }

    #[test]
    fn test_remove_missing_point_is_noop() {
        let mut curve = three_point_curve();
        assert_eq!(curve.remove_point(41.0).unwrap(), 0);
        assert_eq!(curve, three_point_curve());
    }

    #[test]
    fn test_non_finite_temperatures_rejected() {
        let mut curve = three_point_curve();
        for temp in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = curve.add_point(temp, 200).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
            let err = curve.remove_point(temp).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
        assert_eq!(curve, three_point_curve());

        let built = FanCurve::new(vec![
            CurvePoint::new(f64::NAN, 10),
            CurvePoint::new(50.0, 90),
            CurvePoint::new(f64::INFINITY, 20),
        ]);
        assert_eq!(built.points(), &[CurvePoint::new(50.0, 90)]);
    }

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("55.5"), Ok(55.5));
        assert_eq!(parse_temperature("-10"), Ok(-10.0));
        for arg in ["nan", "NaN", "inf", "-inf", "infinity", "hot"] {
            assert!(parse_temperature(arg).is_err(), "{arg} accepted");
        }
    }

    #[test]
    fn test_document_shape() {
        let value = serde_json::to_value(three_point_curve()).unwrap();
        assert_eq!(
            value,
            json!({"points": [
                {"temp": 40, "pwm": 100},
                {"temp": 60, "pwm": 150},
                {"temp": 80, "pwm": 255},
            ]})
        );
    }

    #[test]
    fn test_lenient_point_parsing() {
        let curve: FanCurve = serde_json::from_value(json!({"points": [
            {"temp": "70", "pwm": 300},
            {"temp": 45.9, "pwm": -3},
            {"pwm": 12},
            {"temp": 70, "pwm": "junk"},
        ]}))
        .unwrap();
        assert_eq!(
            curve.points(),
            &[
                CurvePoint { temp_c: 0.0, pwm: 12 },
                CurvePoint { temp_c: 45.0, pwm: 0 },
                CurvePoint { temp_c: 70.0, pwm: 0 },
            ]
        );
    }

    #[test]
    fn test_empty_points_rejected() {
        assert!(serde_json::from_value::<FanCurve>(json!({"points": []})).is_err());
        assert!(serde_json::from_value::<FanCurve>(json!({})).is_err());
        assert!(serde_json::from_value::<FanCurve>(json!({"points": "many"})).is_err());
    }

    #[test]
    fn test_store_invalid_json_loads_default_curve() {
        let dir = TempDir::new().unwrap();
        let store = CurveStore::new(dir.path().join("fan_curve.json"));
        fs::write(store.path(), "{\"points\": [").unwrap();
        assert_eq!(store.load(), default_curve());
        assert_eq!(store.load().points().len(), 5);
    }

    #[test]
    fn test_store_persists_mutations() {
        let dir = TempDir::new().unwrap();
        let store = CurveStore::new(dir.path().join("fan_curve.json"));

        store.add_point(60.0, 10).unwrap();
        store.add_point(60.0, 20).unwrap();
        let reloaded = CurveStore::new(store.path()).load();
        let at_60: Vec<_> = reloaded.points().iter().filter(|p| p.temp_c == 60.0).collect();
        assert_eq!(at_60.len(), 1);
        assert_eq!(at_60[0].pwm, 20);
    }

    #[test]
    fn test_store_remove_sole_point() {
        let dir = TempDir::new().unwrap();
        let store = CurveStore::new(dir.path().join("fan_curve.json"));
        store
            .save(&FanCurve::new(vec![CurvePoint::new(65.0, 180)]))
            .unwrap();

        let curve = store.remove_point(65.0).unwrap();
        assert_eq!(curve.points(), &[FALLBACK_POINT]);
        assert_eq!(store.load().points(), &[FALLBACK_POINT]);
    }

    #[test]
    fn test_store_rejects_non_finite_temperature_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = CurveStore::new(dir.path().join("fan_curve.json"));
        store.save(&three_point_curve()).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        assert_eq!(
            store.add_point(f64::NAN, 200).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(
            store.remove_point(f64::INFINITY).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
        assert_eq!(store.load(), three_point_curve());
    }

    #[test]
    fn test_store_write_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("fan_curve.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), "x").unwrap();

        let store = CurveStore::new(&target);
        assert!(store.add_point(50.0, 100).is_err());
    }
}
