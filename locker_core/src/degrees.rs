//! Keeps the ns target time and its degrees twin in step.
//!
//! Operators can move the target either in ns or in degrees of a reference
//! band. Whenever one pair changes, the other is recomputed and written back.
//! On a simultaneous change the ns side wins.

use crate::pv::{Ch, PvTable};

#[derive(Debug)]
pub struct DegreesSync {
    /// Reference frequency, GHz.
    freq: f64,
    last_ns: f64,
    last_deg: f64,
    last_ns_offset: f64,
    last_deg_offset: f64,
}

impl DegreesSync {
    pub fn new(freq_ghz: f64, pv: &mut PvTable) -> Self {
        Self {
            freq: freq_ghz,
            last_ns: pv.get(Ch::TargetTime),
            last_deg: pv.get(Ch::DegSband),
            last_ns_offset: pv.get(Ch::NsOffset),
            last_deg_offset: pv.get(Ch::DegOffset),
        }
    }

    pub fn ns_to_deg(&self, ns: f64, ns_offset: f64, deg_offset: f64) -> f64 {
        -(ns - ns_offset) * self.freq * 360.0 - deg_offset
    }

    pub fn deg_to_ns(&self, deg: f64, deg_offset: f64, ns_offset: f64) -> f64 {
        -(deg + deg_offset) / (self.freq * 360.0) + ns_offset
    }

    /// Propagate whichever side changed since the last cycle.
    pub fn run(&mut self, pv: &mut PvTable) {
        let ns = pv.get(Ch::TargetTime);
        let deg = pv.get(Ch::DegSband);
        let ns_offset = pv.get(Ch::NsOffset);
        let deg_offset = pv.get(Ch::DegOffset);
        if ns != self.last_ns || ns_offset != self.last_ns_offset {
            let deg_new = self.ns_to_deg(ns, ns_offset, deg_offset);
            self.last_ns = ns;
            self.last_ns_offset = ns_offset;
            self.last_deg = deg_new;
            pv.put(Ch::DegSband, deg_new);
        } else if deg != self.last_deg || deg_offset != self.last_deg_offset {
            let ns_new = self.deg_to_ns(deg, deg_offset, ns_offset);
            self.last_ns = ns_new;
            self.last_deg = deg;
            self.last_deg_offset = deg_offset;
            pv.put(Ch::TargetTime, ns_new);
        }
    }
}
