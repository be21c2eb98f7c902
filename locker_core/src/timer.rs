//! Filtered arrival-time readings from the interval counter.
//!
//! The counter publishes in seconds; everything downstream works in ns. A
//! reading is only accepted when it is new, inside the instrument's limit
//! records, and the jitter gate passes. Accepted readings feed a short history
//! whose spread tells the control law whether the timer is stable enough to
//! act on.

use locker_config::TimerStats;

use crate::pv::{Ch, PvTable};
use crate::ring::Ring;

/// Counter publishes seconds; we keep ns.
const SCALE_NS: f64 = 1e9;

/// One accepted timer reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerReading {
    pub time_ns: f64,
    /// Max-minus-min over the recent history, ns. `None` until the history
    /// has settled.
    pub spread_ns: Option<f64>,
}

#[derive(Debug)]
pub struct FilteredTimer {
    stats: TimerStats,
    times: Ring,
    jitters: Ring,
}

impl FilteredTimer {
    pub fn new(stats: TimerStats, pv: &mut PvTable) -> Self {
        let mut times = Ring::new();
        times.push(pv.get(Ch::Counter));
        let mut jitters = Ring::new();
        jitters.push(pv.get(Ch::CounterJitter));
        Self {
            stats,
            times,
            jitters,
        }
    }

    /// Fetch one reading, or `None` when the sample is stale, out of the
    /// instrument's limits, or too jittery.
    pub fn read(&mut self, pv: &mut PvTable) -> Option<TimerReading> {
        let time = pv.get(Ch::Counter);
        if Some(time) == self.times.last() {
            return None; // instrument has not updated
        }
        let tmin = pv.get(Ch::CounterLow);
        let tmax = pv.get(Ch::CounterHigh);
        if time < tmin || time > tmax {
            return None;
        }
        match self.stats {
            TimerStats::Onboard => {
                let jitter = pv.get(Ch::CounterJitter);
                if jitter > pv.get(Ch::CounterJitterHigh) {
                    return None;
                }
                self.jitters.push(jitter);
            }
            TimerStats::Derived => {
                // Gate on our own history instead of an instrument channel.
                let tol = pv.get(Ch::CounterJitterHigh);
                if let Some(sd) = self.jitters.std_dev()
                    && tol > 0.0
                    && sd > tol
                {
                    return None;
                }
                self.jitters.push(time);
            }
        }
        self.times.push(time);
        Some(TimerReading {
            time_ns: time * SCALE_NS,
            spread_ns: self.times.span().map(|s| s * SCALE_NS),
        })
    }

    /// Spread of the held history in ns, `None` until settled.
    pub fn spread_ns(&self) -> Option<f64> {
        self.times.span().map(|s| s * SCALE_NS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
            "#,
        )
        .unwrap()
    }

    fn pv_with(values: &[(&str, f64)]) -> PvTable {
        let table = Table {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        };
        PvTable::new(Box::new(table), &cfg())
    }

    const MEAN: &str = "C:GetOffsetInvMeasMean";

    #[test]
    fn accepts_in_range_reading_in_ns() {
        let mut pv = pv_with(&[
            (MEAN, 1e-6),
            ("C:GetOffsetInvMeasMean.LOW", -1.0),
            ("C:GetOffsetInvMeasMean.HIGH", 1.0),
            ("C:GetMeasJitter", 1e-12),
            ("C:GetMeasJitter.HIGH", 1e-9),
        ]);
        let mut timer = FilteredTimer::new(TimerStats::Onboard, &mut pv);
        pv.put(Ch::Counter, 2e-6);
        let r = timer.read(&mut pv).unwrap();
        assert!((r.time_ns - 2_000.0).abs() < 1e-9);
        assert_eq!(r.spread_ns, None); // history not settled yet
    }

    #[test]
    fn repeated_sample_is_stale() {
        let mut pv = pv_with(&[
            (MEAN, 1e-6),
            ("C:GetOffsetInvMeasMean.LOW", -1.0),
            ("C:GetOffsetInvMeasMean.HIGH", 1.0),
            ("C:GetMeasJitter.HIGH", 1e-9),
        ]);
        let mut timer = FilteredTimer::new(TimerStats::Onboard, &mut pv);
        assert!(timer.read(&mut pv).is_none());
    }

    #[test]
    fn out_of_limits_and_jittery_samples_rejected() {
        let mut pv = pv_with(&[
            (MEAN, 1e-6),
            ("C:GetOffsetInvMeasMean.LOW", 0.0),
            ("C:GetOffsetInvMeasMean.HIGH", 1e-3),
            ("C:GetMeasJitter", 1e-12),
            ("C:GetMeasJitter.HIGH", 1e-9),
        ]);
        let mut timer = FilteredTimer::new(TimerStats::Onboard, &mut pv);
        pv.put(Ch::Counter, 2e-3); // above HIGH
        assert!(timer.read(&mut pv).is_none());
        pv.put(Ch::Counter, 5e-6);
        pv.put(Ch::CounterJitter, 1e-6); // above jitter limit
        assert!(timer.read(&mut pv).is_none());
        pv.put(Ch::CounterJitter, 1e-12);
        assert!(timer.read(&mut pv).is_some());
    }

    #[test]
    fn spread_appears_once_settled() {
        let mut pv = pv_with(&[
            (MEAN, 0.0),
            ("C:GetOffsetInvMeasMean.LOW", -1.0),
            ("C:GetOffsetInvMeasMean.HIGH", 1.0),
            ("C:GetMeasJitter", 1e-12),
            ("C:GetMeasJitter.HIGH", 1e-9),
        ]);
        let mut timer = FilteredTimer::new(TimerStats::Onboard, &mut pv);
        let mut last = None;
        for i in 1..=8 {
            pv.put(Ch::Counter, i as f64 * 1e-9);
            last = timer.read(&mut pv);
            assert!(last.is_some());
        }
        // 9 samples held (the seed plus eight reads), spread 8 ns.
        let spread = last.unwrap().spread_ns.unwrap();
        assert!((spread - 8.0).abs() < 1e-9);
    }
}
