//! Whole-cycle ("bucket") ambiguity resolution.
//!
//! A narrowband phase lock cannot tell zero error from an error of whole
//! locking-reference cycles. Each cycle the detector compares the measured
//! arrival time against the model and resolves the integer part; the guards
//! here decide when the integer is trustworthy enough to act on.

/// Reason a candidate jump was discarded. Kept separate from "no jump" so
/// telemetry can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpReject {
    /// Recent timer spread too wide, or history not settled.
    UnstableTimer,
    /// Residual after removing whole cycles is too large to be a real jump.
    NonIntegerResidual,
}

/// Result of one jump check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpState {
    /// Whole locking cycles of error; 0 means no actionable jump.
    pub buckets: i64,
    /// Residual after removing the integer part, ns.
    pub bucket_error_ns: f64,
    /// The exact correction to apply, ns.
    pub exact_error_ns: f64,
    /// Raw model-vs-measurement error, ns.
    pub terror_ns: f64,
    /// Why a nonzero candidate was discarded, if it was.
    pub reject: Option<JumpReject>,
}

impl JumpState {
    pub fn none() -> Self {
        Self {
            buckets: 0,
            bucket_error_ns: 0.0,
            exact_error_ns: 0.0,
            terror_ns: 0.0,
            reject: None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.buckets != 0 && self.reject.is_none()
    }

    pub fn rejected(mut self, reason: JumpReject) -> Self {
        self.buckets = 0;
        self.reject = Some(reason);
        self
    }
}

/// Resolve whole cycles of a continuous locking band.
pub fn resolve_continuous(terror_ns: f64, locking_f: f64) -> JumpState {
    let buckets = (terror_ns * locking_f).round() as i64;
    let bucket_error_ns = terror_ns - buckets as f64 / locking_f;
    JumpState {
        buckets,
        bucket_error_ns,
        exact_error_ns: buckets as f64 / locking_f,
        terror_ns,
        reject: None,
    }
}

/// Resolve against the 47-subdivision of the pulse-picker period. The bucket
/// count wraps modulo 47, so the result is always in `0..47`.
pub fn resolve_picker(terror_ns: f64, laser_f: f64) -> JumpState {
    let bucket_f = laser_f * 47.0;
    let buckets = ((terror_ns * bucket_f).round() as i64).rem_euclid(47);
    let bucket_error_ns = terror_ns - buckets as f64 / bucket_f;
    JumpState {
        buckets,
        bucket_error_ns,
        exact_error_ns: buckets as f64 / bucket_f,
        terror_ns,
        reject: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LOCKING_F: f64 = 3.808;
    const GEN2_LASER_F: f64 = 1.3 / 196.0 * 7.0 / 50.0;

    #[test]
    fn exact_cycles_resolve_cleanly() {
        for k in [-3i64, -1, 1, 2, 5] {
            let terror = k as f64 / LOCKING_F;
            let j = resolve_continuous(terror, LOCKING_F);
            assert_eq!(j.buckets, k);
            assert!(j.bucket_error_ns.abs() < 1e-12);
            assert!((j.exact_error_ns - terror).abs() < 1e-12);
        }
    }

    #[test]
    fn near_zero_error_is_no_jump() {
        let j = resolve_continuous(0.01, LOCKING_F);
        assert_eq!(j.buckets, 0);
        assert!((j.bucket_error_ns - 0.01).abs() < 1e-12);
    }

    #[test]
    fn picker_buckets_wrap_mod_47() {
        let bucket = 1.0 / (GEN2_LASER_F * 47.0); // ~22.9 ns
        let j = resolve_picker(3.0 * bucket, GEN2_LASER_F);
        assert_eq!(j.buckets, 3);
        // 50 buckets of error reads as 3 after the wrap.
        let j = resolve_picker(50.0 * bucket, GEN2_LASER_F);
        assert_eq!(j.buckets, 3);
        // Negative errors wrap up into range.
        let j = resolve_picker(-1.0 * bucket, GEN2_LASER_F);
        assert_eq!(j.buckets, 46);
    }

    #[test]
    fn rejection_zeroes_buckets_but_keeps_reason() {
        let j = resolve_continuous(2.0 / LOCKING_F, LOCKING_F).rejected(JumpReject::UnstableTimer);
        assert_eq!(j.buckets, 0);
        assert!(!j.is_actionable());
        assert_eq!(j.reject, Some(JumpReject::UnstableTimer));
    }

    proptest! {
        #[test]
        fn residual_is_under_half_a_cycle(terror in -10.0f64..10.0) {
            let j = resolve_continuous(terror, LOCKING_F);
            prop_assert!(j.bucket_error_ns.abs() <= 0.5 / LOCKING_F + 1e-12);
        }

        #[test]
        fn picker_buckets_stay_in_range(terror in -5000.0f64..5000.0) {
            let j = resolve_picker(terror, GEN2_LASER_F);
            prop_assert!((0..47).contains(&j.buckets));
        }
    }
}
