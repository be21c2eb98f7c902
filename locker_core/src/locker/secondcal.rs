//! Secondary calibration: a harmonic residual fit against an independent
//! reference instrument.
//!
//! The actuator is stepped to random positions in a small window around its
//! current position, pausing long enough for the reference instrument to
//! settle at each. The mean-centered difference between the instrument's
//! readback and the commanded time is fitted with a two-term harmonic whose
//! coefficients `set_time` later subtracts.

use std::time::Duration;

use locker_traits::Clock;
use rand::Rng;
use tracing::info;

use crate::heartbeat::{Beat, Heartbeat};
use crate::math::harmonic_fit;
use crate::pv::{Ch, PvTable};

use super::{CalibOutcome, LockerShared};

/// Sample count and per-sample settle time for the reference instrument.
const CYCLES: usize = 29;
const SETTLE: Duration = Duration::from_secs(30);

/// Sweep window around the current position, ns.
const WINDOW_NS: f64 = 0.5;

/// Reference instrument publishes seconds.
const SCALE_NS: f64 = 1e9;

pub fn second_calibrate(
    shared: &mut LockerShared,
    pv: &mut PvTable,
    clock: &dyn Clock,
    hb: &mut Heartbeat,
) -> CalibOutcome {
    let t0 = shared.motor.position(pv, clock);
    let mut rng = rand::thread_rng();
    let mut points = Vec::with_capacity(CYCLES);
    for _ in 0..CYCLES {
        match hb.check(pv) {
            Beat::Alive => {}
            _ => return CalibOutcome::HeartbeatLost,
        }
        if pv.get(Ch::SecondaryEnable) == 0.0 {
            shared.motor.move_to(t0, pv, clock);
            return CalibOutcome::Cancelled;
        }
        let t = t0 + rng.gen_range(-WINDOW_NS..WINDOW_NS);
        shared.motor.move_to(t, pv, clock);
        clock.sleep(SETTLE);
        let readback = pv.get(Ch::SecondarySample) * SCALE_NS;
        points.push((t, readback - t));
    }
    shared.motor.move_to(t0, pv, clock);

    let fit = match harmonic_fit(&points, shared.profile.secondary_fit_freq) {
        Ok(fit) => fit,
        Err(e) => {
            pv.report(1, "secondary calibration fit failed");
            info!(error = %e, "secondary calibration fit failed");
            return CalibOutcome::Failed("harmonic fit failed");
        }
    };
    pv.put(Ch::SecondarySin, fit.sin_coeff);
    pv.put(Ch::SecondaryCos, fit.cos_coeff);
    info!(
        sin = fit.sin_coeff,
        cos = fit.cos_coeff,
        "secondary calibration complete"
    );
    // Residual scale doubles as the quality figure here.
    let rms_ns = (fit.sin_coeff.powi(2) + fit.cos_coeff.powi(2)).sqrt();
    CalibOutcome::Complete { rms_ns }
}
