#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Simulated control-point layer for the locking engine.
//!
//! `SimChannels` behaves like a small slice of a facility: a value table for
//! ordinary channels, plus sawtooth arrival-time physics behind the interval
//! counter record so calibration and jump handling can be exercised end to
//! end. A `SimHandle` lets tests reach into the state from outside the
//! engine: injecting bucket jumps, flipping request flags, or severing the
//! connection.

pub mod error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use locker_traits::Channels;

use crate::error::HwError;

/// Physics and channel wiring behind the simulated counter.
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Actuator channel name; `.RBV`/`.DMOV` are derived from it.
    pub phase_motor: String,
    /// Trigger time channel name.
    pub laser_trigger: String,
    /// Interval-counter mean record name.
    pub counter_mean: String,
    /// True cable delay after the trigger, ns.
    pub delay_ns: f64,
    /// True photodiode-to-counter delay, ns.
    pub offset_ns: f64,
    /// Laser repetition period, ns.
    pub period_ns: f64,
    /// ns per trigger channel unit.
    pub trigger_scale: f64,
}

#[derive(Debug)]
struct SimState {
    params: SimParams,
    values: HashMap<String, f64>,
    /// Arrival-time shift injected by tests, ns.
    jump_ns: f64,
    /// Counter reads so far; adds a sub-fs ramp so consecutive reads are
    /// never bit-identical.
    counter_reads: u64,
    /// Writes per channel, for hardware-churn assertions.
    writes: HashMap<String, u64>,
    severed: bool,
}

impl SimState {
    /// Arrival time the counter would measure, in seconds.
    fn counter_seconds(&mut self) -> f64 {
        let phase_ns = self.values.get(&self.params.phase_motor).copied().unwrap_or(0.0) * 1e-3;
        let trigger_ns = self
            .values
            .get(&self.params.laser_trigger)
            .copied()
            .unwrap_or(0.0)
            * self.params.trigger_scale;
        let trig_out = trigger_ns + self.params.delay_ns;
        let laser_t0 = phase_ns + self.params.offset_ns;
        let n = ((trig_out - laser_t0) / self.params.period_ns).ceil();
        let time_ns = laser_t0 + n * self.params.period_ns + self.jump_ns;
        self.counter_reads += 1;
        time_ns * 1e-9 + self.counter_reads as f64 * 1e-19
    }
}

/// Simulated channel layer.
pub struct SimChannels {
    state: Arc<Mutex<SimState>>,
}

impl SimChannels {
    pub fn new(params: SimParams) -> Self {
        let state = SimState {
            params,
            values: HashMap::new(),
            jump_ns: 0.0,
            counter_reads: 0,
            writes: HashMap::new(),
            severed: false,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// External view onto the same state, for test orchestration.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Channels for SimChannels {
    fn get(
        &mut self,
        name: &str,
        _timeout: Duration,
    ) -> std::result::Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HwError::ChannelUnavailable(name.to_string()))?;
        if state.severed {
            return Err(HwError::Timeout(name.to_string()).into());
        }
        if name == state.params.counter_mean {
            let v = state.counter_seconds();
            return Ok(v);
        }
        if let Some(base) = name.strip_suffix(".RBV") {
            if base == state.params.phase_motor {
                return Ok(state.values.get(base).copied().unwrap_or(0.0));
            }
        }
        if let Some(base) = name.strip_suffix(".DMOV") {
            if base == state.params.phase_motor {
                // The simulated actuator lands instantly.
                return Ok(1.0);
            }
        }
        Ok(state.values.get(name).copied().unwrap_or(0.0))
    }

    fn put(
        &mut self,
        name: &str,
        value: f64,
        _timeout: Duration,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HwError::ChannelUnavailable(name.to_string()))?;
        if state.severed {
            return Err(HwError::Timeout(name.to_string()).into());
        }
        *state.writes.entry(name.to_string()).or_insert(0) += 1;
        state.values.insert(name.to_string(), value);
        Ok(())
    }

    fn put_text(
        &mut self,
        name: &str,
        value: &str,
        _timeout: Duration,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!(channel = name, text = value, "status text");
        Ok(())
    }
}

/// Test-side handle into a `SimChannels` instance.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn set(&self, name: &str, value: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.values.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> f64 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.values.get(name).copied())
            .unwrap_or(0.0)
    }

    /// How many times the engine has written `name`.
    pub fn write_count(&self, name: &str) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.writes.get(name).copied())
            .unwrap_or(0)
    }

    /// Shift every subsequent arrival-time measurement by `ns`.
    pub fn inject_jump(&self, ns: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.jump_ns += ns;
        }
    }

    /// Make every access fail until restored, as a dead gateway would.
    pub fn sever(&self, severed: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.severed = severed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sim() -> (SimChannels, SimHandle) {
        let chans = SimChannels::new(SimParams {
            phase_motor: "L:PH".into(),
            laser_trigger: "L:TDES".into(),
            counter_mean: "C:GetOffsetInvMeasMean".into(),
            delay_ns: 5.0,
            offset_ns: 2.0,
            period_ns: 1.0 / 0.068,
            trigger_scale: 1.0,
        });
        let handle = chans.handle();
        (chans, handle)
    }

    #[test]
    fn counter_follows_sawtooth_physics() {
        let (mut chans, handle) = sim();
        handle.set("L:TDES", 100.0);
        let t = Duration::from_secs(1);
        let first = chans.get("C:GetOffsetInvMeasMean", t).unwrap() * 1e9;
        // Gate opens at 105; the landing pulse is < one period later.
        assert!(first >= 105.0);
        assert!(first < 105.0 + 1.0 / 0.068 + 1e-6);
        // A second read is never bit-identical.
        let second = chans.get("C:GetOffsetInvMeasMean", t).unwrap() * 1e9;
        assert_ne!(first, second);
        assert!((second - first).abs() < 1e-6);
    }

    #[rstest]
    #[case(".RBV")]
    #[case(".DMOV")]
    fn motor_suffixes_resolve(#[case] suffix: &str) {
        let (mut chans, _) = sim();
        let t = Duration::from_secs(1);
        chans.put("L:PH", 250.0, t).unwrap();
        let v = chans.get(&format!("L:PH{suffix}"), t).unwrap();
        if suffix == ".RBV" {
            assert_eq!(v, 250.0);
        } else {
            assert_eq!(v, 1.0);
        }
    }

    #[test]
    fn injected_jump_shifts_arrivals() {
        let (mut chans, handle) = sim();
        let t = Duration::from_secs(1);
        let before = chans.get("C:GetOffsetInvMeasMean", t).unwrap() * 1e9;
        handle.inject_jump(3.0);
        let after = chans.get("C:GetOffsetInvMeasMean", t).unwrap() * 1e9;
        assert!((after - before - 3.0).abs() < 1e-6);
    }

    #[test]
    fn severed_connection_fails_access() {
        let (mut chans, handle) = sim();
        handle.sever(true);
        assert!(chans.get("anything", Duration::from_secs(1)).is_err());
        handle.sever(false);
        assert!(chans.get("anything", Duration::from_secs(1)).is_ok());
    }
}
