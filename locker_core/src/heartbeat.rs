//! Liveness counter with single-writer enforcement.
//!
//! The engine increments a counter channel every cycle. A negative or cleared
//! value is an external shutdown request, and any other change we did not make
//! ourselves means a
//! second instance is running against the same installation; both end this
//! instance. A failed read is tolerated and retried next cycle.

use std::time::Duration;

use locker_traits::Clock;
use tracing::{info, warn};

use crate::pv::{Ch, PvTable};

/// Heartbeat verdict for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Alive,
    /// Operator set the counter negative.
    ShutdownRequested,
    /// Someone else is writing the counter.
    ForeignWriter,
}

#[derive(Debug)]
pub struct Heartbeat {
    /// Value we expect to read back; the next write is this plus one.
    expected: f64,
}

impl Heartbeat {
    /// Claim the counter. Reads it twice across a short pause; movement in
    /// between means another instance already owns it.
    pub fn start(pv: &mut PvTable, clock: &dyn Clock) -> Result<Self, Beat> {
        let first = pv.try_get(Ch::Watchdog).map_err(|e| {
            warn!(error = %e, "heartbeat channel unreadable at startup");
            Beat::ForeignWriter
        })?;
        if first < 0.0 {
            return Err(Beat::ShutdownRequested);
        }
        clock.sleep(Duration::from_secs(1));
        let second = pv.try_get(Ch::Watchdog).map_err(|e| {
            warn!(error = %e, "heartbeat channel unreadable at startup");
            Beat::ForeignWriter
        })?;
        if second < 0.0 {
            return Err(Beat::ShutdownRequested);
        }
        if second != first {
            warn!("another instance is incrementing the heartbeat");
            return Err(Beat::ForeignWriter);
        }
        info!(value = first, "heartbeat claimed");
        Ok(Self { expected: first })
    }

    /// One cycle: verify the counter is ours, then bump it.
    pub fn check(&mut self, pv: &mut PvTable) -> Beat {
        let value = match pv.try_get(Ch::Watchdog) {
            Ok(v) => v,
            Err(e) => {
                // Transient gateway trouble; keep going and retry.
                warn!(error = %e, "heartbeat read failed, continuing");
                return Beat::Alive;
            }
        };
        if value < 0.0 {
            return Beat::ShutdownRequested;
        }
        if value != self.expected {
            // A cleared counter is an operator stop, not a rival instance.
            if value == 0.0 {
                info!("heartbeat cleared by operator, shutting down");
                return Beat::ShutdownRequested;
            }
            warn!(
                read = value,
                expected = self.expected,
                "another instance is incrementing the heartbeat"
            );
            return Beat::ForeignWriter;
        }
        self.expected = value + 1.0;
        pv.put(Ch::Watchdog, self.expected);
        Beat::Alive
    }
}
