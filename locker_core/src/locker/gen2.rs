//! Second-generation locker: 1.3 GHz reference, pulse-picked oscillator, phase
//! shifter with no readback and an actuator scale that calibration has to
//! measure. Jump buckets are 47 subdivisions of the pulse-picker period.

use std::collections::VecDeque;
use std::time::Duration;

use locker_traits::Clock;
use tracing::{debug, info};

use crate::heartbeat::{Beat, Heartbeat};
use crate::math::nelder_mead;
use crate::pv::{Ch, PvTable};
use crate::sawtooth::{SawtoothModel, wrap_into};

use super::jump::{self, JumpReject, JumpState};
use super::{CalibOutcome, LockerShared, guard_stability};

/// Errors inside this band are left to the fine feedback; jump logic only
/// engages beyond it.
const JUMP_DEADBAND_NS: f64 = 21.0;

/// Trigger lead applied when setting time, ns.
const TRIGGER_LEAD_NS: f64 = 100.0;

/// Trigger pad applied when re-issuing the trigger after a jump fix, ns.
const TRIGGER_PAD_NS: f64 = 64.0;

/// Wide gate used while sweeping, and the normal running gate.
const SWEEP_GATE_WIDTH: f64 = 1200.0;
const RUN_GATE_WIDTH: f64 = 400.0;

/// Stability-phase polling: window depth, relative-spread pass, poll period.
const STABILITY_WINDOW: usize = 4;
const STABILITY_FRACTION: f64 = 0.1;
const STABILITY_POLL: Duration = Duration::from_secs(2);
const STABILITY_MAX_POLLS: usize = 150;

const OFFSET_SEARCH_STEPS: usize = 10_000;

#[derive(Debug)]
pub struct Gen2Locker {
    pub shared: LockerShared,
}

impl Gen2Locker {
    pub fn new(shared: LockerShared) -> Self {
        Self { shared }
    }

    /// Jump detection against the target time directly; the deadband keeps
    /// ordinary feedback errors out of the bucket logic.
    pub fn check_jump(&mut self, pv: &mut PvTable, _clock: &dyn Clock) {
        let s = &mut self.shared;
        let Some(t) = s.read_timer(pv) else {
            s.jump = JumpState::none().rejected(JumpReject::UnstableTimer);
            return;
        };
        let terror = t - pv.get(Ch::TargetTime);
        s.cal.delay_ns = pv.get(Ch::Delay);
        s.cal.offset_ns = pv.get(Ch::Offset);
        if terror.abs() < JUMP_DEADBAND_NS {
            s.jump = JumpState::none();
            return;
        }
        let mut jump = jump::resolve_picker(terror, s.profile.laser_f);
        if guard_stability(s, pv) {
            jump = jump.rejected(JumpReject::UnstableTimer);
        }
        if jump.is_actionable() {
            info!(
                buckets = jump.buckets,
                residual_ns = jump.bucket_error_ns,
                "bucket jump detected"
            );
        } else {
            pv.report(2, "Laser OK");
        }
        s.jump = jump;
    }

    /// Move the actuator by the bucket error (wrapped into the picker
    /// period), fold the applied delta into the offset, then re-issue the
    /// trigger from the corrected constants.
    pub fn fix_jump(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        if !self.shared.jump.is_actionable() {
            pv.report(2, "trying to fix non-existant jump");
            return;
        }
        pv.report(2, "Fixing Jump...");
        let s = &mut self.shared;
        let pp = s.profile.pp_period_ns;
        let old_pc = s.motor.position(pv, clock);
        let wrapped_pc = wrap_into(old_pc - s.jump.exact_error_ns, pp);
        s.motor.move_to(wrapped_pc, pv, clock);
        clock.sleep(Duration::from_secs(2));
        s.cal.shift_offset(-(wrapped_pc - old_pc), pp, pv);
        let t = s.trigger.get_ns(pv);
        let laser_t = t - s.cal.offset_ns - s.cal.delay_ns - TRIGGER_PAD_NS;
        s.trigger.set_ns(pv, laser_t);
        s.finish_fix(pv);
        clock.sleep(Duration::from_secs(2));
    }

    /// Trigger leads the target by a fixed margin; the actuator takes the
    /// phase wrapped into the picker period and scaled by the measured
    /// actuator scale.
    pub fn set_time(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        let s = &mut self.shared;
        let Some(t) = s.requested_time(pv) else {
            return;
        };
        let laser_tdes = t - s.cal.delay_ns - TRIGGER_LEAD_NS;
        let pc_ns = wrap_into(t - s.cal.offset_ns, s.profile.pp_period_ns);
        let pc = s.corrected_phase(pc_ns, pv) / s.cal.phase_scale;

        if pv.get(Ch::EnableTrigger) != 0.0 && s.trigger.get_ns(pv) != laser_tdes {
            s.trigger.set_ns(pv, laser_tdes);
            pv.report(2, "moving trigger");
        }
        let pc_diff = s.motor.position(pv, clock) - pc;
        if pc_diff.abs() > s.profile.motor_deadband_ns {
            debug!(phase_ns = pc, "commanding actuator");
            s.motor.move_to(pc, pv, clock);
        }
    }

    /// Two-phase calibration: measure `delay` directly by waiting for the
    /// timer to stabilize at zero phase, then sweep past a full picker period
    /// to measure the actuator scale and fit `offset`.
    pub fn calibrate(
        &mut self,
        pv: &mut PvTable,
        clock: &dyn Clock,
        hb: &mut Heartbeat,
    ) -> CalibOutcome {
        self.shared.trigger.set_width(pv, SWEEP_GATE_WIDTH);
        let outcome = self.calibrate_inner(pv, clock, hb);
        self.shared.trigger.set_width(pv, RUN_GATE_WIDTH);
        outcome
    }

    fn calibrate_inner(
        &mut self,
        pv: &mut PvTable,
        clock: &dyn Clock,
        hb: &mut Heartbeat,
    ) -> CalibOutcome {
        let s = &mut self.shared;
        s.motor.move_to(0.0, pv, clock);

        // Phase 1: poll until a short rolling window of readings agrees with
        // the newest one, then take that reading as the direct cable delay.
        let mut window: VecDeque<f64> = VecDeque::with_capacity(STABILITY_WINDOW);
        let mut settled = None;
        for _ in 0..STABILITY_MAX_POLLS {
            match hb.check(pv) {
                Beat::Alive => {}
                _ => return CalibOutcome::HeartbeatLost,
            }
            if pv.get(Ch::CalibRequest) == 0.0 {
                return CalibOutcome::Cancelled;
            }
            clock.sleep(STABILITY_POLL);
            let Some(t) = s.timer.read(pv).map(|r| r.time_ns) else {
                continue;
            };
            if !window.is_empty() {
                let mean = window.iter().sum::<f64>() / window.len() as f64;
                if mean != 0.0 && ((mean - t) / mean).abs() <= STABILITY_FRACTION {
                    settled = Some(t);
                    break;
                }
            }
            if window.len() == STABILITY_WINDOW {
                window.pop_front();
            }
            window.push_back(t);
        }
        let Some(t_zero) = settled else {
            return CalibOutcome::Failed("timer never stabilized at zero phase");
        };
        let pp = s.profile.pp_period_ns;
        let delay = t_zero - s.trigger.get_ns(pv);
        s.cal.delay_ns = delay;
        pv.put(Ch::Delay, delay);
        s.cal.offset_ns = wrap_into(t_zero, pp);
        pv.put(Ch::Offset, s.cal.offset_ns);
        debug!(delay, offset = s.cal.offset_ns, "stability phase complete");

        // Phase 2: sweep past one full picker period.
        let points = s.profile.calib_points;
        let range = s.profile.calib_range_ns;
        let positions: Vec<f64> = (0..points)
            .map(|i| range * i as f64 / (points - 1) as f64)
            .collect();
        let t_trig = s.trigger.get_ns(pv);
        let samples = match s.sweep(&positions, pv, clock, hb) {
            Ok(samples) => samples,
            Err(outcome) => return outcome,
        };
        s.motor.move_to(0.0, pv, clock);

        let good: Vec<(f64, f64)> = samples
            .iter()
            .filter(|sm| sm.good)
            .map(|sm| (sm.commanded_ns, sm.measured_ns))
            .collect();
        if good.len() < 4 {
            return CalibOutcome::Failed("too few valid readings in sweep");
        }

        // Actuator scale from the sweep's sawtooth ramp. The global minimum
        // marks the wrap edge and the global maximum the point just before
        // it; the longer monotonic segment on either side carries the slope,
        // observed ns per commanded ns.
        let min_idx = good
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map_or(0, |(i, _)| i);
        let max_idx = good
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map_or(0, |(i, _)| i);
        let ramp: &[(f64, f64)] = if good.len() - min_idx > max_idx + 1 {
            &good[min_idx..]
        } else {
            &good[..=max_idx]
        };
        let (first, last) = (ramp[0], ramp[ramp.len() - 1]);
        let commanded_swing = (last.0 - first.0).abs();
        if commanded_swing > 0.0 {
            s.cal.phase_scale = (last.1 - first.1).abs() / commanded_swing;
            pv.put(Ch::PhaseScale, s.cal.phase_scale);
        }

        // Fit the offset on samples mapped through the measured scale. The
        // fit needs a gate-referenced delay, taken from the earliest sweep
        // arrival; the stability-phase delay includes the zero-phase arrival
        // distance and would shift the whole model off the data.
        let mapped: Vec<(f64, f64)> = good
            .iter()
            .map(|&(x, t)| (x * s.cal.phase_scale, t))
            .collect();
        let fit_delay = mapped
            .iter()
            .map(|&(_, t)| t)
            .min_by(f64::total_cmp)
            .unwrap_or(delay + t_trig)
            - t_trig;
        let mut best = (f64::INFINITY, s.cal.offset_ns);
        for i in 0..OFFSET_SEARCH_STEPS {
            let offset = pp * i as f64 / OFFSET_SEARCH_STEPS as f64;
            let model = SawtoothModel {
                delay_ns: fit_delay,
                offset_ns: offset,
                period_ns: pp,
            };
            let (err, _) = model.masked_error(t_trig, &mapped);
            if err < best.0 {
                best = (err, offset);
            }
        }
        let (err, offset) = best;
        let rms_ns = (err / points as f64).sqrt();

        // Cross-check with a free refinement of all three constants. The
        // refined numbers are diagnostic only; the persisted delay stays the
        // direct measurement from phase 1.
        let refined = nelder_mead(
            |p| {
                SawtoothModel {
                    delay_ns: p[0],
                    offset_ns: p[1],
                    period_ns: p[2].abs().max(1e-9),
                }
                .masked_error(t_trig, &mapped)
                .0
            },
            &[fit_delay, offset, pp],
            1.0,
            400,
        );
        info!(
            delay = refined.0[0],
            offset = refined.0[1],
            period = refined.0[2],
            residual = refined.1,
            "refinement cross-check"
        );

        s.cal.offset_ns = offset;
        pv.put(Ch::Offset, offset);
        pv.put(Ch::CalibError, rms_ns);
        debug!(offset, rms_ns, scale = s.cal.phase_scale, "calibration fit");
        CalibOutcome::Complete { rms_ns }
    }
}
