//! Slow drift correction fed by an external timing monitor.
//!
//! A timetool-style diagnostic publishes a raw drift signal. Each control
//! cycle folds a fresh sample into an exponentially smoothed value, clamped to
//! +/-15 ps, and the smoothed value times the operator gain is subtracted from
//! the commanded phase. Stale samples are ignored so the average only moves
//! when the monitor does.

use crate::pv::{Ch, PvTable};

/// Smoothed-value clamp, ns.
const CLAMP_NS: f64 = 0.015;

#[derive(Debug)]
pub struct DriftCorrector {
    /// Raw-signal-to-ns scale.
    multiplier: f64,
    smoothed_ns: f64,
    last_signal: f64,
    initialized: bool,
}

impl DriftCorrector {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier,
            smoothed_ns: 0.0,
            last_signal: 0.0,
            initialized: false,
        }
    }

    /// Phase correction (ns) to subtract from the commanded phase.
    pub fn correction_ns(&mut self, pv: &mut PvTable) -> f64 {
        let signal = pv.get(Ch::DriftSignal) * self.multiplier;
        let offset = pv.get(Ch::DriftOffset);
        let gain = pv.get(Ch::DriftGain);
        let smoothing = pv.get(Ch::DriftSmoothing);
        let accumulate = pv.get(Ch::DriftAccum) == 1.0;
        self.smoothed_ns = pv.get(Ch::DriftValue);
        let fresh_ns = signal - offset;
        if !self.initialized {
            self.smoothed_ns = fresh_ns;
            self.last_signal = signal;
            self.initialized = true;
            pv.put(Ch::DriftValue, self.smoothed_ns);
        } else if signal != self.last_signal && accumulate && smoothing > 0.0 {
            self.smoothed_ns += (fresh_ns - self.smoothed_ns) / smoothing;
            self.smoothed_ns = self.smoothed_ns.clamp(-CLAMP_NS, CLAMP_NS);
            pv.put(Ch::DriftValue, self.smoothed_ns);
            self.last_signal = signal;
        }
        gain * self.smoothed_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pv::Ch;
    use locker_config::Config;
    use locker_traits::Channels;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Table {
        values: HashMap<String, f64>,
    }

    impl Channels for Table {
        fn get(
            &mut self,
            name: &str,
            _timeout: Duration,
        ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.values.get(name).copied().unwrap_or(0.0))
        }

        fn put(
            &mut self,
            name: &str,
            value: f64,
            _timeout: Duration,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.values.insert(name.to_string(), value);
            Ok(())
        }

        fn put_text(
            &mut self,
            _name: &str,
            _value: &str,
            _timeout: Duration,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    fn cfg() -> Config {
        locker_config::load_toml(
            r#"
            [locker]
            name = "sim"

            [channels]
            device_base = "L:"
            phase_motor = "L:PH"
            laser_trigger = "L:TDES"
            counter = "C:"

            [channels.drift]
            signal = "D:SIG"
            value = "D:VAL"
            offset = "D:OFF"
            gain = "D:GAIN"
            smoothing = "D:SMOOTH"
            accum = "D:ACCUM"
            "#,
        )
        .unwrap()
    }

    fn pv() -> PvTable {
        PvTable::new(
            Box::new(Table {
                values: HashMap::new(),
            }),
            &cfg(),
        )
    }

    #[test]
    fn first_cycle_initializes_without_accumulating() {
        let mut pv = pv();
        pv.put(Ch::DriftSignal, 3_000.0); // 3e3 * 1e-6 = 0.003 ns
        pv.put(Ch::DriftGain, 1.0);
        pv.put(Ch::DriftAccum, 1.0);
        pv.put(Ch::DriftSmoothing, 4.0);
        let mut d = DriftCorrector::new(1e-6);
        let c = d.correction_ns(&mut pv);
        assert!((c - 0.003).abs() < 1e-12);
        // Same signal again: no movement.
        let c = d.correction_ns(&mut pv);
        assert!((c - 0.003).abs() < 1e-12);
    }

    #[test]
    fn fresh_samples_are_smoothed_and_clamped() {
        let mut pv = pv();
        pv.put(Ch::DriftSignal, 0.0);
        pv.put(Ch::DriftGain, 1.0);
        pv.put(Ch::DriftAccum, 1.0);
        pv.put(Ch::DriftSmoothing, 2.0);
        let mut d = DriftCorrector::new(1e-6);
        assert_eq!(d.correction_ns(&mut pv), 0.0);
        // New sample of 0.004 ns with smoothing 2 moves halfway.
        pv.put(Ch::DriftSignal, 4_000.0);
        let c = d.correction_ns(&mut pv);
        assert!((c - 0.002).abs() < 1e-12);
        assert!((pv.get(Ch::DriftValue) - 0.002).abs() < 1e-12);
        // A huge sample hits the 15 ps clamp.
        pv.put(Ch::DriftSignal, 1.0e9);
        let c = d.correction_ns(&mut pv);
        assert!((c - CLAMP_NS).abs() < 1e-12);
    }

    #[test]
    fn accumulation_off_freezes_value() {
        let mut pv = pv();
        pv.put(Ch::DriftSignal, 1_000.0);
        pv.put(Ch::DriftGain, 2.0);
        pv.put(Ch::DriftAccum, 0.0);
        pv.put(Ch::DriftSmoothing, 2.0);
        let mut d = DriftCorrector::new(1e-6);
        let first = d.correction_ns(&mut pv);
        assert!((first - 0.002).abs() < 1e-12);
        pv.put(Ch::DriftSignal, 9_000.0);
        // Value channel still holds the initial reading.
        pv.put(Ch::DriftValue, 0.001);
        let c = d.correction_ns(&mut pv);
        assert!((c - 0.002).abs() < 1e-12);
    }
}
