//! Per-installation hardware constants, resolved once at locker construction.

use locker_config::{Config, FeatureCfg, Generation};

/// Immutable frequency plan and limits for one locker generation.
///
/// All frequencies are in GHz so that `1.0 / f` is directly a period in ns.
#[derive(Debug, Clone)]
pub struct HardwareProfile {
    pub generation: Generation,
    /// Facility RF reference.
    pub f0_ghz: f64,
    /// Optical repetition rate of the controlled laser.
    pub laser_f: f64,
    /// Locking reference whose whole cycles define a "bucket".
    pub locking_f: f64,
    /// Coarse trigger granularity.
    pub trigger_f: f64,
    /// Sweep points for the primary calibration.
    pub calib_points: usize,
    /// Sweep span for the primary calibration, ns.
    pub calib_range_ns: f64,
    /// Largest residual still attributable to a whole-bucket jump, ns.
    pub max_jump_error_ns: f64,
    /// Oscillator setpoint/readback disagreement limit.
    pub max_frequency_error: f64,
    /// Settable time window, ns.
    pub min_time_ns: f64,
    pub max_time_ns: f64,
    /// Actuator move below this is not worth commanding, ns.
    pub motor_deadband_ns: f64,
    /// Harmonic frequency (GHz) used when fitting the secondary calibration.
    pub secondary_fit_freq: f64,
    /// Harmonic frequency (GHz) used when applying the secondary correction.
    pub secondary_apply_freq: f64,
    /// Pulse-picker period, ns. Only meaningful on Gen2.
    pub pp_period_ns: f64,
}

impl HardwareProfile {
    pub fn for_generation(generation: Generation) -> Self {
        match generation {
            Generation::Gen1 => Self::gen1(),
            Generation::Gen2 => Self::gen2(),
        }
    }

    /// SIM-era locker: 476 MHz reference, 68 MHz oscillator locked at 3.808 GHz,
    /// 119 MHz event trigger.
    pub fn gen1() -> Self {
        let f0 = 0.476;
        let rmin = 56.0; // divide ratio down to 8.5 MHz
        let min_f = f0 / rmin;
        let laser_f = min_f * (rmin / 7.0); // 0.068 GHz
        let locking_f = min_f * (rmin * 8.0); // 3.808 GHz
        let trigger_f = min_f * (rmin / 4.0); // 0.119 GHz
        Self {
            generation: Generation::Gen1,
            f0_ghz: f0,
            laser_f,
            locking_f,
            trigger_f,
            calib_points: 50,
            calib_range_ns: 30.0,
            max_jump_error_ns: 0.05,
            max_frequency_error: 100.0,
            min_time_ns: -880_000.0,
            max_time_ns: 20_000.0,
            motor_deadband_ns: 1e-6,
            secondary_fit_freq: 2.600,
            secondary_apply_freq: 3.808,
            pp_period_ns: 1.0 / laser_f,
        }
    }

    /// ATCA-era locker: 1.3 GHz reference, pulse-picked oscillator at ~929 kHz.
    /// The jump bucket is 1/47th of the pulse-picker period rather than one
    /// cycle of a separate locking band.
    pub fn gen2() -> Self {
        let f0 = 1.3;
        let rmin = 196.0;
        let min_f = f0 / rmin;
        let laser_f = min_f * 7.0 / 50.0; // ~9.2857e-4 GHz
        let pp_period = 1.0 / laser_f;
        Self {
            generation: Generation::Gen2,
            f0_ghz: f0,
            laser_f,
            locking_f: laser_f,
            trigger_f: 1.0,
            calib_points: 120,
            // Sweep must cross the full picker period with margin so the
            // minimum and maximum both land inside it.
            calib_range_ns: 1.4 * pp_period,
            max_jump_error_ns: 22.0,
            max_frequency_error: 100.0,
            min_time_ns: -880_000.0,
            max_time_ns: 20_000.0,
            motor_deadband_ns: 1e-9,
            secondary_fit_freq: 2.600,
            secondary_apply_freq: 3.808,
            pp_period_ns: pp_period,
        }
    }

    /// Laser repetition period in ns.
    #[inline]
    pub fn laser_period_ns(&self) -> f64 {
        1.0 / self.laser_f
    }

    /// Period of the phase wrap applied to the actuator: one laser cycle on
    /// Gen1, one pulse-picker period on Gen2.
    #[inline]
    pub fn phase_wrap_ns(&self) -> f64 {
        match self.generation {
            Generation::Gen1 => self.laser_period_ns(),
            Generation::Gen2 => self.pp_period_ns,
        }
    }
}

/// Feedback-law layers enabled for this session. Resolved once; every flagged
/// code path is type-checked against this struct instead of re-reading config.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub use_drift_correction: bool,
    pub use_secondary_calibration: bool,
    pub use_dither: bool,
}

impl Features {
    pub fn from_config(cfg: &Config) -> Self {
        let FeatureCfg {
            use_drift_correction,
            use_secondary_calibration,
            use_dither,
            ..
        } = cfg.features;
        Self {
            use_drift_correction,
            use_secondary_calibration,
            use_dither,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen1_frequency_plan() {
        let p = HardwareProfile::gen1();
        assert!((p.laser_f - 0.068).abs() < 1e-12);
        assert!((p.locking_f - 3.808).abs() < 1e-12);
        assert!((p.trigger_f - 0.119).abs() < 1e-12);
        assert!((p.laser_period_ns() - 14.705882352941176).abs() < 1e-9);
    }

    #[test]
    fn gen2_picker_period_and_sweep() {
        let p = HardwareProfile::gen2();
        assert!((p.pp_period_ns - 1076.923).abs() < 1e-2);
        // Sweep overshoots the picker period by ~40%.
        assert!(p.calib_range_ns > 1.39 * p.pp_period_ns);
        assert!(p.calib_range_ns < 1.41 * p.pp_period_ns);
    }
}
