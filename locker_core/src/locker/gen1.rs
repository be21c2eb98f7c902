//! First-generation locker: 68 MHz oscillator locked to a 3.808 GHz band,
//! ns-calibrated phase shifter with a readback, 119 MHz event trigger.

use std::time::Duration;

use locker_traits::Clock;
use tracing::{debug, info};

use crate::heartbeat::Heartbeat;
use crate::pv::{Ch, PvTable};
use crate::sawtooth::{SawtoothModel, wrap_into};

use super::jump::{self, JumpReject, JumpState};
use super::{CalibOutcome, LockerShared, guard_stability};

/// Offset-search resolution for the calibration fit.
const OFFSET_SEARCH_STEPS: usize = 10_000;

#[derive(Debug)]
pub struct Gen1Locker {
    pub shared: LockerShared,
}

impl Gen1Locker {
    pub fn new(shared: LockerShared) -> Self {
        Self { shared }
    }

    fn model(&self) -> SawtoothModel {
        SawtoothModel {
            delay_ns: self.shared.cal.delay_ns,
            offset_ns: self.shared.cal.offset_ns,
            period_ns: self.shared.profile.laser_period_ns(),
        }
    }

    /// Compare the measured arrival time against the sawtooth model and
    /// resolve whole locking-band cycles of error.
    pub fn check_jump(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        let Some(t) = self.shared.read_timer(pv) else {
            self.shared.jump = JumpState::none().rejected(JumpReject::UnstableTimer);
            return;
        };
        let t_trig = self.shared.trigger.get_ns(pv);
        let pc = self.shared.motor.position(pv, clock);
        self.shared.cal.delay_ns = pv.get(Ch::Delay);
        self.shared.cal.offset_ns = pv.get(Ch::Offset);
        let predicted = self.model().predict(pc, t_trig).time_ns;
        let terror = t - predicted;
        let mut jump = jump::resolve_continuous(terror, self.shared.profile.locking_f);
        if guard_stability(&mut self.shared, pv) {
            jump = jump.rejected(JumpReject::UnstableTimer);
        } else if jump.bucket_error_ns.abs() > self.shared.profile.max_jump_error_ns {
            pv.report(2, "not an integer number of buckets");
            jump = jump.rejected(JumpReject::NonIntegerResidual);
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
        self.shared.jump = jump;
    }

    /// Move the actuator by the exact whole-cycle error, then fold the applied
    /// delta into the calibration offset so the model stays consistent.
    pub fn fix_jump(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        if !self.shared.jump.is_actionable() {
            pv.report(1, "trying to fix non-existant jump");
            return;
        }
        pv.report(1, "Fixing Jump");
        let s = &mut self.shared;
        let period = s.profile.laser_period_ns();
        let old_pc = s.motor.position(pv, clock);
        let new_pc = wrap_into(old_pc - s.jump.exact_error_ns, period);
        s.motor.move_to(new_pc, pv, clock);
        clock.sleep(Duration::from_secs(2));
        s.cal.shift_offset(-(new_pc - old_pc), period, pv);
        s.finish_fix(pv);
    }

    /// Decompose the requested time into trigger and sub-cycle phase
    /// commands, layer the optional corrections, and touch hardware only when
    /// something actually changed.
    pub fn set_time(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        let s = &mut self.shared;
        let Some(t) = s.requested_time(pv) else {
            return;
        };
        let laser_f = s.profile.laser_f;
        let period = 1.0 / laser_f;
        let laser_t = t - s.cal.offset_ns;
        let n_laser = (laser_t * laser_f).floor();
        let pc = wrap_into(t - (s.cal.offset_ns + n_laser * period), period);
        let trigger_f = s.profile.trigger_f;
        let n_trig = ((t - s.cal.delay_ns - 1.0 / trigger_f) * trigger_f).round();
        let trig = n_trig / trigger_f;

        let pc = s.corrected_phase(pc, pv);

        if pv.get(Ch::EnableTrigger) != 0.0 && s.trigger.get_ns(pv) != trig {
            s.trigger.set_ns(pv, trig);
        }
        let pc_diff = s.motor.position(pv, clock) - pc;
        if pc_diff.abs() > s.profile.motor_deadband_ns {
            s.motor.move_to(pc, pv, clock);
        }
    }

    /// Sweep the actuator over the calibration range, then recover `delay`
    /// from the earliest arrival and `offset` by brute-force search over one
    /// period.
    pub fn calibrate(
        &mut self,
        pv: &mut PvTable,
        clock: &dyn Clock,
        hb: &mut Heartbeat,
    ) -> CalibOutcome {
        let s = &mut self.shared;
        let points = s.profile.calib_points;
        let range = s.profile.calib_range_ns;
        let positions: Vec<f64> = (0..points)
            .map(|i| range * i as f64 / (points - 1) as f64)
            .collect();
        let t_trig = s.trigger.get_ns(pv);
        s.motor.move_to(0.0, pv, clock);
        let samples = match s.sweep(&positions, pv, clock, hb) {
            Ok(samples) => samples,
            Err(outcome) => return outcome,
        };
        s.motor.move_to(positions[0], pv, clock);

        let good: Vec<(f64, f64)> = samples
            .iter()
            .filter(|sm| sm.good)
            .map(|sm| (sm.commanded_ns, sm.measured_ns))
            .collect();
        let Some(minv) = good
            .iter()
            .map(|&(_, t)| t)
            .min_by(|a, b| a.total_cmp(b))
        else {
            return CalibOutcome::Failed("no valid timer readings in sweep");
        };

        let period = s.profile.laser_period_ns();
        let delay = minv - t_trig;
        let mut best = (f64::INFINITY, 0.0);
        for i in 0..OFFSET_SEARCH_STEPS {
            let offset = period * i as f64 / OFFSET_SEARCH_STEPS as f64;
            let model = SawtoothModel {
                delay_ns: delay,
                offset_ns: offset,
                period_ns: period,
            };
            let (err, _) = model.masked_error(t_trig, &good);
            if err < best.0 {
                best = (err, offset);
            }
        }
        let (err, offset) = best;
        let rms_ns = (err / points as f64).sqrt();
        debug!(delay, offset, rms_ns, "calibration fit");

        s.cal.delay_ns = delay;
        s.cal.offset_ns = offset;
        pv.put(Ch::Delay, delay);
        pv.put(Ch::Offset, offset);
        pv.put(Ch::CalibError, rms_ns);
        CalibOutcome::Complete { rms_ns }
    }
}
