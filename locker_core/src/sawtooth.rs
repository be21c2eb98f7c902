//! Sawtooth arrival-time model.
//!
//! The interval counter measures the laser pulse that lands after the trigger
//! gate opens. As the phase actuator advances, the measured time ramps with it
//! and snaps back one laser period whenever the next pulse takes over, giving
//! a sawtooth in actuator position. The model predicts the measured time for a
//! given actuator position, plus a validity flag masking the snap-back region
//! where the fit is unreliable.

/// Model parameters found by calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SawtoothModel {
    /// Cable and electronics delay after the trigger, ns.
    pub delay_ns: f64,
    /// Delay from the photodiode to the interval counter, ns.
    pub offset_ns: f64,
    /// Laser repetition period, ns.
    pub period_ns: f64,
}

/// One model evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicted {
    pub time_ns: f64,
    /// False in the snap-back region near the teeth edges.
    pub valid: bool,
}

impl SawtoothModel {
    /// Predicted counter time for actuator position `phase_ns` with the
    /// trigger set to `trigger_ns`.
    pub fn predict(&self, phase_ns: f64, trigger_ns: f64) -> Predicted {
        let trig_out = trigger_ns + self.delay_ns;
        let laser_t0 = phase_ns + self.offset_ns;
        let n_laser = ((trig_out - laser_t0) / self.period_ns).ceil();
        let time_ns = laser_t0 + n_laser * self.period_ns;
        let tr = time_ns - trig_out;
        let valid = tr >= 0.2 * self.period_ns && tr <= 0.8 * self.period_ns;
        Predicted { time_ns, valid }
    }

    /// Sum of squared residuals against measured `(phase, time)` pairs,
    /// counting only points the model marks valid at `trigger_ns`. Returns
    /// the error and the number of points that contributed.
    pub fn masked_error(&self, trigger_ns: f64, samples: &[(f64, f64)]) -> (f64, usize) {
        let mut err = 0.0;
        let mut used = 0;
        for &(phase, measured) in samples {
            let p = self.predict(phase, trigger_ns);
            if p.valid {
                err += (measured - p.time_ns).powi(2);
                used += 1;
            }
        }
        (err, used)
    }
}

/// Wrap `x` into `[0, period)`.
pub fn wrap_into(x: f64, period: f64) -> f64 {
    let r = x.rem_euclid(period);
    if r == period { 0.0 } else { r }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PERIOD: f64 = 14.705882352941176; // 68 MHz

    fn model() -> SawtoothModel {
        SawtoothModel {
            delay_ns: 5.0,
            offset_ns: 2.0,
            period_ns: PERIOD,
        }
    }

    #[test]
    fn hand_computed_point() {
        // trigger 100, delay 5 -> gate at 105; phase 0, offset 2 -> pulse
        // train anchored at 2. ceil(103 / p) = 8, so the landing pulse is at
        // 2 + 8p.
        let p = model().predict(0.0, 100.0);
        assert!((p.time_ns - (2.0 + 8.0 * PERIOD)).abs() < 1e-9);
        let tr = p.time_ns - 105.0;
        assert!(tr > 0.0 && tr < PERIOD);
    }

    #[test]
    fn mask_excludes_tooth_edges() {
        let m = model();
        // Position the pulse right at the gate: tr ~ 0, masked out.
        let phase_at_edge = 105.0 - 2.0 - 8.0 * PERIOD + 8.0 * PERIOD; // = 103
        let p = m.predict(wrap_into(phase_at_edge, PERIOD), 100.0);
        assert!(!p.valid);
        // Mid-tooth is valid.
        let p = m.predict(wrap_into(phase_at_edge - 0.5 * PERIOD, PERIOD), 100.0);
        assert!(p.valid);
    }

    #[test]
    fn true_model_has_zero_masked_error() {
        let m = model();
        let samples: Vec<(f64, f64)> = (0..50)
            .map(|i| {
                let phase = i as f64 * 0.6;
                (phase, m.predict(phase, 100.0).time_ns)
            })
            .collect();
        let (err, used) = m.masked_error(100.0, &samples);
        assert!(err < 1e-18);
        assert!(used > 25);
    }

    proptest! {
        #[test]
        fn predicted_time_lands_within_one_period_after_gate(
            phase in -100.0f64..100.0,
            trigger in -1000.0f64..1000.0,
        ) {
            let m = model();
            let p = m.predict(phase, trigger);
            let tr = p.time_ns - (trigger + m.delay_ns);
            prop_assert!(tr >= 0.0);
            prop_assert!(tr <= m.period_ns + 1e-9);
        }

        #[test]
        fn shifting_phase_by_a_period_shifts_nothing(
            phase in -50.0f64..50.0,
            trigger in -500.0f64..500.0,
        ) {
            let m = model();
            let a = m.predict(phase, trigger);
            let b = m.predict(phase + m.period_ns, trigger);
            prop_assert!((a.time_ns - b.time_ns).abs() < 1e-9);
        }

        #[test]
        fn wrap_into_stays_in_range(x in -1e6f64..1e6, period in 1.0f64..2000.0) {
            let r = wrap_into(x, period);
            prop_assert!(r >= 0.0);
            prop_assert!(r < period);
        }
    }
}
