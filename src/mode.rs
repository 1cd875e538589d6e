// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Mode dispatch: turns (mode, temperature, manual duty) into a PWM duty.

use crate::curve::{CurveStore, clamp_duty};
use crate::state::{ControlMode, ControlState, ControlStateSync};
use std::io;

/// Duty used by [`ControlMode::Silent`].
pub const SILENT_DUTY: u8 = 77;
/// Duty used by [`ControlMode::Normal`].
pub const NORMAL_DUTY: u8 = 128;
/// Duty used by [`ControlMode::Performance`].
pub const PERFORMANCE_DUTY: u8 = 255;
/// Manual duty assumed when the caller has none to offer.
pub const DEFAULT_MANUAL_DUTY: i64 = 128;

/// Resolves modes against the stored curve and publishes the result.
#[derive(Debug, Clone)]
pub struct ModeResolver {
    curve: CurveStore,
    state: ControlStateSync,
}

impl ModeResolver {
    pub fn new(curve: CurveStore, state: ControlStateSync) -> Self {
        Self { curve, state }
    }

    pub fn curve(&self) -> &CurveStore {
        &self.curve
    }

    pub fn state_sync(&self) -> &ControlStateSync {
        &self.state
    }

    /// Duty for `mode`. `manual_duty` only matters in manual mode and is
    /// clamped into range; auto reloads the curve and interpolates.
    pub fn resolve(&self, mode: ControlMode, temp_c: f64, manual_duty: i64) -> u8 {
        match mode {
            ControlMode::Manual => clamp_duty(manual_duty),
            ControlMode::Auto => self.curve.interpolate(temp_c),
            ControlMode::Silent => SILENT_DUTY,
            ControlMode::Normal => NORMAL_DUTY,
            ControlMode::Performance => PERFORMANCE_DUTY,
        }
    }

    /// Resolve the duty and publish `{mode, desired}` only if it differs
    /// from `current_target`. Returns the state now in force.
    pub fn update_state(
        &self,
        mode: ControlMode,
        temp_c: f64,
        current_target: Option<u8>,
        manual_duty: i64,
    ) -> io::Result<ControlState> {
        let desired = self.resolve(mode, temp_c, manual_duty);

        if current_target == Some(desired) {
            return Ok(ControlState::new(mode, current_target));
        }

        let state = ControlState::new(mode, Some(desired));
        self.state.write(&state)?;
        log::debug!("Published {mode} duty {desired} at {temp_c:.1}C");
        Ok(state)
    }
}
