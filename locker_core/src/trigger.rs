//! Coarse trigger time and gate-width control.
//!
//! Newer event systems take the trigger delay directly in ns; older ones take
//! ticks of the 119 MHz event clock. The conversion lives here so the rest of
//! the engine only ever sees ns.

use crate::pv::{Ch, PvTable};

/// One event-clock tick, ns.
const TICK_NS: f64 = 1000.0 / 119.0;

#[derive(Debug, Clone, Copy)]
pub struct TriggerChannel {
    /// ns per channel unit.
    scale: f64,
}

impl TriggerChannel {
    pub fn new(in_ticks: bool) -> Self {
        Self {
            scale: if in_ticks { TICK_NS } else { 1.0 },
        }
    }

    /// Current trigger time in ns.
    pub fn get_ns(&self, pv: &mut PvTable) -> f64 {
        pv.get(Ch::LaserTrigger) * self.scale
    }

    /// Set the trigger time from ns.
    pub fn set_ns(&self, pv: &mut PvTable, t_ns: f64) {
        pv.put(Ch::LaserTrigger, t_ns / self.scale);
    }

    /// Gate width in channel units; only present where configured.
    pub fn set_width(&self, pv: &mut PvTable, width: f64) {
        pv.put(Ch::LaserTriggerWidth, width);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_scale_matches_event_clock() {
        assert!((TICK_NS - 8.403361344537815).abs() < 1e-12);
        let ticks = TriggerChannel::new(true);
        let ns = TriggerChannel::new(false);
        assert!((ticks.scale / ns.scale - TICK_NS).abs() < 1e-12);
    }
}
