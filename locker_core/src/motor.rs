//! Phase actuator front end.
//!
//! The actuator channel works in ps while the engine works in ns. Moves are
//! confirmed before returning: either by polling the done-moving flag and
//! readback, or, for shifters with no readback, by waiting until two
//! consecutive position reads agree.

use std::time::Duration;

use locker_traits::Clock;
use tracing::warn;

use crate::pv::{Ch, PvTable};

/// Actuator channel unit relative to ns.
const SCALE: f64 = 1e-3;

/// How a completed move is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// Poll the done-moving flag, then confirm the readback agrees with the
    /// request.
    Readback,
    /// No readback; wait for consecutive position reads to agree, then a
    /// fixed pause.
    FixedDelay,
}

#[derive(Debug)]
pub struct PhaseMotor {
    mode: SettleMode,
    position_ns: f64,
    max_tries: u32,
    poll: Duration,
    /// Readback agreement tolerance, ns.
    tolerance_ns: f64,
}

impl PhaseMotor {
    pub fn new(mode: SettleMode, pv: &mut PvTable, clock: &dyn Clock) -> Self {
        let mut motor = Self {
            mode,
            position_ns: 0.0,
            max_tries: 100,
            poll: Duration::from_millis(100),
            tolerance_ns: 2e-5,
        };
        motor.position_ns = pv.get(Ch::PhaseMotor) * SCALE;
        motor.wait_for_stop(pv, clock);
        motor
    }

    /// Command a move and block until it settles.
    pub fn move_to(&mut self, pos_ns: f64, pv: &mut PvTable, clock: &dyn Clock) {
        pv.put(Ch::PhaseMotor, pos_ns / SCALE);
        self.position_ns = pos_ns;
        self.wait_for_stop(pv, clock);
    }

    /// Last commanded position, re-confirmed against the hardware.
    pub fn position(&mut self, pv: &mut PvTable, clock: &dyn Clock) -> f64 {
        self.wait_for_stop(pv, clock);
        self.position_ns = pv.get(Ch::PhaseMotor) * SCALE;
        self.position_ns
    }

    fn wait_for_stop(&mut self, pv: &mut PvTable, clock: &dyn Clock) {
        match self.mode {
            SettleMode::FixedDelay => {
                let mut prev = self.position_ns;
                loop {
                    let now = pv.get(Ch::PhaseMotor) * SCALE;
                    if now == prev {
                        break;
                    }
                    prev = now;
                    clock.sleep(Duration::from_secs(1));
                }
                clock.sleep(Duration::from_millis(200));
            }
            SettleMode::Readback => {
                for _ in 0..self.max_tries {
                    let stopped = pv.get(Ch::PhaseMotorDmov) != 0.0;
                    if stopped {
                        let rb = pv.get(Ch::PhaseMotorRb) * SCALE;
                        if (rb - self.position_ns).abs() < self.tolerance_ns {
                            return;
                        }
                    }
                    clock.sleep(self.poll);
                }
                warn!(
                    target_ns = self.position_ns,
                    "actuator did not settle, continuing"
                );
            }
        }
    }
}
