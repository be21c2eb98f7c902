//! The locking engine: status gate, calibration, jump handling, and the
//! `set_time` feedback law, specialized per hardware generation.
//!
//! Exactly two generations exist, so dispatch is a closed enum rather than an
//! open trait object. Everything both generations share (the status gate, the
//! sweep machinery, the layered phase corrections) lives on [`LockerShared`].

pub mod gen1;
pub mod gen2;
pub mod jump;
mod secondcal;

use locker_config::{Config, Generation};
use locker_traits::Clock;
use tracing::{debug, info, warn};

use crate::drift::DriftCorrector;
use crate::heartbeat::{Beat, Heartbeat};
use crate::motor::{PhaseMotor, SettleMode};
use crate::profile::{Features, HardwareProfile};
use crate::pv::{Ch, PvTable};
use crate::sawtooth::wrap_into;
use crate::timer::FilteredTimer;
use crate::trigger::TriggerChannel;

use jump::JumpState;

/// Actuator-to-ns scale assumed until a Gen2 calibration measures one.
const DEFAULT_PHASE_SCALE: f64 = 2856.0 / 2600.0;

/// The calibrated mapping between actuator, trigger, and arrival time.
/// Persisted through the control-point layer so a restart resumes with the
/// last-known constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// Cable and electronics delay after the trigger, ns.
    pub delay_ns: f64,
    /// Photodiode-to-timer delay, ns. Always kept in `[0, wrap period)`.
    pub offset_ns: f64,
    /// Observed-ns per commanded-ns of the actuator. 1.0 on Gen1.
    pub phase_scale: f64,
}

impl CalibrationState {
    /// Reload the persisted constants.
    pub fn load(pv: &mut PvTable, profile: &HardwareProfile) -> Self {
        let delay_ns = pv.get(Ch::Delay);
        let offset_ns = wrap_into(pv.get(Ch::Offset), profile.phase_wrap_ns());
        let phase_scale = match profile.generation {
            Generation::Gen1 => 1.0,
            Generation::Gen2 => {
                let s = pv.get(Ch::PhaseScale);
                if s > 0.0 { s } else { DEFAULT_PHASE_SCALE }
            }
        };
        Self {
            delay_ns,
            offset_ns,
            phase_scale,
        }
    }

    /// Adjust the offset and re-wrap it into the valid phase range before
    /// persisting.
    pub fn shift_offset(&mut self, delta_ns: f64, wrap_ns: f64, pv: &mut PvTable) {
        self.offset_ns = wrap_into(self.offset_ns + delta_ns, wrap_ns);
        pv.put(Ch::Offset, self.offset_ns);
    }
}

/// Status-gate verdict for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub ok: bool,
    pub message: &'static str,
}

/// How a calibration run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibOutcome {
    /// Constants persisted; RMS residual of the fit in ns.
    Complete { rms_ns: f64 },
    /// Operator cleared the request mid-sweep; nothing persisted.
    Cancelled,
    /// Heartbeat went fatal mid-sweep; the supervisor must terminate.
    HeartbeatLost,
    Failed(&'static str),
}

/// One calibration sweep point.
#[derive(Debug, Clone, Copy)]
pub struct SweepSample {
    pub commanded_ns: f64,
    pub measured_ns: f64,
    pub good: bool,
}

/// State common to both generations.
#[derive(Debug)]
pub struct LockerShared {
    pub profile: HardwareProfile,
    pub features: Features,
    pub cal: CalibrationState,
    pub jump: JumpState,
    pub timer: FilteredTimer,
    pub trigger: TriggerChannel,
    pub motor: PhaseMotor,
    pub drift: DriftCorrector,
}

impl LockerShared {
    fn new(cfg: &Config, profile: HardwareProfile, pv: &mut PvTable, clock: &dyn Clock) -> Self {
        let settle = match profile.generation {
            Generation::Gen1 => SettleMode::Readback,
            Generation::Gen2 => SettleMode::FixedDelay,
        };
        let timer = FilteredTimer::new(cfg.locker.timer_stats, pv);
        let motor = PhaseMotor::new(settle, pv, clock);
        let trigger = TriggerChannel::new(cfg.locker.trig_in_ticks);
        let cal = CalibrationState::load(pv, &profile);
        Self {
            profile,
            features: Features::from_config(cfg),
            cal,
            jump: JumpState::none(),
            timer,
            trigger,
            motor,
            drift: DriftCorrector::new(cfg.features.drift_multiplier),
        }
    }

    /// Roll up laser health into one boolean and publish it. Each check reads
    /// the live value against its own alarm limits; the first failure wins
    /// the message.
    pub fn locker_status(&mut self, pv: &mut PvTable) -> StatusReport {
        let mut ok = true;
        let mut message = "OK";

        let rf = pv.get(Ch::RfPower);
        if rf > pv.get(Ch::RfPowerHigh) || rf < pv.get(Ch::RfPowerLow) {
            ok = false;
            message = "RF power out of range";
        }
        let diode = pv.get(Ch::DiodePower);
        if diode > pv.get(Ch::DiodePowerHigh) || diode < pv.get(Ch::DiodePowerLow) {
            ok = false;
            message = "diode power out of range";
        }
        let freq_err = (pv.get(Ch::FreqSetpoint) - pv.get(Ch::OscTargetFreq)).abs();
        if freq_err > self.profile.max_frequency_error {
            ok = false;
            message = "frequency set point out of range";
        }
        if pv.get(Ch::LaserLocked) == 0.0 {
            ok = false;
            message = "laser not indicating locked";
        }
        if !ok {
            pv.report(1, message);
        }
        pv.put(Ch::LaserOk, if ok { 1.0 } else { 0.0 });
        StatusReport { ok, message }
    }

    /// Layer the optional corrections onto a commanded phase, ns.
    pub fn corrected_phase(&mut self, mut pc: f64, pv: &mut PvTable) -> f64 {
        if self.features.use_drift_correction {
            pc -= self.drift.correction_ns(pv);
        }
        if self.features.use_secondary_calibration {
            let sa = pv.get(Ch::SecondarySin);
            let ca = pv.get(Ch::SecondaryCos);
            let w = 2.0 * std::f64::consts::PI * self.profile.secondary_apply_freq;
            pc -= sa * (w * pc).sin() + ca * (w * pc).cos();
        }
        if self.features.use_dither {
            let level_ps = pv.get(Ch::DitherLevel);
            pc += (rand::random::<f64>() - 0.5) * level_ps / 1000.0;
        }
        pc
    }

    /// Target time for this cycle, or `None` when it cannot be acted on.
    /// Non-finite targets and targets outside the settable window are
    /// rejected; alarm limits clamp when configured.
    pub fn requested_time(&self, pv: &mut PvTable) -> Option<f64> {
        let t = pv.get(Ch::TargetTime);
        if !t.is_finite() {
            pv.report(2, "desired time is NaN");
            return None;
        }
        if t < self.profile.min_time_ns || t > self.profile.max_time_ns {
            pv.report(2, "need to move timer trigger");
            return None;
        }
        let high = pv.get(Ch::TargetTimeHigh);
        let low = pv.get(Ch::TargetTimeLow);
        if low < high {
            return Some(t.clamp(low, high));
        }
        Some(t)
    }

    /// Read the timer and publish the live timing error against the target.
    pub fn read_timer(&mut self, pv: &mut PvTable) -> Option<f64> {
        let reading = self.timer.read(pv)?;
        let target = pv.get(Ch::TargetTime);
        pv.put(Ch::TimingError, reading.time_ns - target);
        Some(reading.time_ns)
    }

    /// Drive the actuator through `positions`, collecting one timer sample at
    /// each. Checks the heartbeat and the cancellation flag before every
    /// step. `Err` carries the outcome that ended the sweep early.
    pub fn sweep(
        &mut self,
        positions: &[f64],
        pv: &mut PvTable,
        clock: &dyn Clock,
        hb: &mut Heartbeat,
    ) -> Result<Vec<SweepSample>, CalibOutcome> {
        let mut samples = Vec::with_capacity(positions.len());
        for &x in positions {
            match hb.check(pv) {
                Beat::Alive => {}
                _ => return Err(CalibOutcome::HeartbeatLost),
            }
            if pv.get(Ch::CalibRequest) == 0.0 {
                info!("calibration cancelled by operator");
                return Err(CalibOutcome::Cancelled);
            }
            self.motor.move_to(x, pv, clock);
            clock.sleep(std::time::Duration::from_secs(1));
            let mut sample = SweepSample {
                commanded_ns: x,
                measured_ns: 0.0,
                good: false,
            };
            // The timer may not have a fresh value immediately after a move.
            for _ in 0..25 {
                if let Some(r) = self.timer.read(pv) {
                    sample.measured_ns = r.time_ns;
                    sample.good = true;
                    break;
                }
            }
            if !sample.good {
                pv.report(2, "timer error, bad data - continuing to calibrate");
            }
            debug!(
                commanded = sample.commanded_ns,
                measured = sample.measured_ns,
                good = sample.good,
                "sweep point"
            );
            samples.push(sample);
        }
        Ok(samples)
    }

    /// Publish the current jump state.
    pub fn publish_jump(&mut self, pv: &mut PvTable) {
        pv.put(Ch::BucketError, self.jump.buckets as f64);
        pv.put(Ch::UnfixedError, self.jump.bucket_error_ns);
    }

    /// Common tail of a jump fix: log, bump the corrections counter.
    fn finish_fix(&mut self, pv: &mut PvTable) {
        pv.report(2, "Done Fixing Jump");
        let count = pv.get(Ch::BucketCounter);
        pv.put(Ch::BucketCounter, count + 1.0);
        info!(buckets = self.jump.buckets, "bucket jump corrected");
        self.jump = JumpState::none();
    }
}

/// A locker instance for one supervisor session.
#[derive(Debug)]
pub enum Locker {
    Gen1(gen1::Gen1Locker),
    Gen2(gen2::Gen2Locker),
}

impl Locker {
    pub fn new(cfg: &Config, pv: &mut PvTable, clock: &dyn Clock) -> Self {
        let profile = HardwareProfile::for_generation(cfg.locker.generation);
        let shared = LockerShared::new(cfg, profile, pv, clock);
        match cfg.locker.generation {
            Generation::Gen1 => Self::Gen1(gen1::Gen1Locker::new(shared)),
            Generation::Gen2 => Self::Gen2(gen2::Gen2Locker::new(shared)),
        }
    }

    pub fn shared(&mut self) -> &mut LockerShared {
        match self {
            Self::Gen1(l) => &mut l.shared,
            Self::Gen2(l) => &mut l.shared,
        }
    }

    pub fn locker_status(&mut self, pv: &mut PvTable) -> StatusReport {
        self.shared().locker_status(pv)
    }

    pub fn check_jump(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        match self {
            Self::Gen1(l) => l.check_jump(pv, clock),
            Self::Gen2(l) => l.check_jump(pv, clock),
        }
    }

    pub fn fix_jump(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        match self {
            Self::Gen1(l) => l.fix_jump(pv, clock),
            Self::Gen2(l) => l.fix_jump(pv, clock),
        }
    }

    pub fn set_time(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        match self {
            Self::Gen1(l) => l.set_time(pv, clock),
            Self::Gen2(l) => l.set_time(pv, clock),
        }
    }

    pub fn calibrate(
        &mut self,
        pv: &mut PvTable,
        clock: &dyn Clock,
        hb: &mut Heartbeat,
    ) -> CalibOutcome {
        match self {
            Self::Gen1(l) => l.calibrate(pv, clock, hb),
            Self::Gen2(l) => l.calibrate(pv, clock, hb),
        }
    }

    /// Harmonic fit against an independent reference instrument; identical
    /// machinery on both generations.
    pub fn second_calibrate(
        &mut self,
        pv: &mut PvTable,
        clock: &dyn Clock,
        hb: &mut Heartbeat,
    ) -> CalibOutcome {
        secondcal::second_calibrate(self.shared(), pv, clock, hb)
    }

    pub fn jump(&mut self) -> JumpState {
        self.shared().jump
    }
}

/// Shared jump-guard step: zero out candidates the timer cannot support.
fn guard_stability(shared: &mut LockerShared, pv: &mut PvTable) -> bool {
    let spread = shared.timer.spread_ns();
    let unstable = match spread {
        None => true,
        Some(s) => s == 0.0 || s > 2.0 * shared.profile.max_jump_error_ns,
    };
    if unstable {
        pv.report(2, "counter not stable");
        warn!(?spread, "jump candidate discarded, timer unstable");
    }
    unstable
}
