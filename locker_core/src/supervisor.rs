//! The outer control loop: builds a session, runs monitor cycles, and
//! rebuilds the whole session on any error that escapes a cycle. The loop
//! only ends on a fatal heartbeat verdict or an operator shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use locker_config::Config;
use locker_traits::{Channels, Clock};
use tracing::{debug, error, info, warn};

use crate::degrees::DegreesSync;
use crate::heartbeat::{Beat, Heartbeat};
use crate::locker::{CalibOutcome, Locker};
use crate::pv::{Ch, PvTable};

/// Verdict of one monitor cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Continue,
    /// Heartbeat says stop; the loop must exit cleanly.
    Fatal,
}

/// Everything owned for one connect-to-failure span. A fresh session reloads
/// calibration constants from their persisted channels.
pub struct Session {
    pub pv: PvTable,
    pub hb: Heartbeat,
    pub locker: Locker,
    pub degrees: DegreesSync,
}

impl Session {
    /// `Ok(None)` means the heartbeat refused the claim and the process
    /// should exit without error.
    pub fn connect(
        io: Box<dyn Channels + Send>,
        cfg: &Config,
        clock: &dyn Clock,
    ) -> Option<Self> {
        let mut pv = PvTable::new(io, cfg);
        let hb = match Heartbeat::start(&mut pv, clock) {
            Ok(hb) => hb,
            Err(beat) => {
                warn!(?beat, "heartbeat refused startup claim");
                return None;
            }
        };
        let locker = Locker::new(cfg, &mut pv, clock);
        let degrees = DegreesSync::new(cfg.locker.deg_conversion_freq_ghz, &mut pv);
        Some(Self {
            pv,
            hb,
            locker,
            degrees,
        })
    }

    /// One monitor iteration. Ordering matters: heartbeat before anything
    /// long-running, the status gate before any actuation.
    pub fn cycle(&mut self, cfg: &Config, clock: &dyn Clock) -> eyre::Result<CycleStatus> {
        debug!("cycle start");
        match self.hb.check(&mut self.pv) {
            Beat::Alive => {}
            Beat::ShutdownRequested => {
                info!("shutdown requested through heartbeat channel");
                return Ok(CycleStatus::Fatal);
            }
            Beat::ForeignWriter => {
                error!("foreign heartbeat writer, exiting");
                return Ok(CycleStatus::Fatal);
            }
        }
        self.pv.put(Ch::Busy, 0.0);

        let status = self.locker.locker_status(&mut self.pv);
        if !status.ok {
            self.pv.report(2, status.message);
            clock.sleep(Duration::from_millis(cfg.loop_cfg.not_ok_backoff_ms));
            return Ok(CycleStatus::Continue);
        }

        if self.pv.get(Ch::CalibRequest) != 0.0 {
            self.pv.report(2, "calibration requested");
            self.pv.put(Ch::LaserOk, 0.0);
            self.pv.put(Ch::Busy, 1.0);
            let outcome = self.locker.calibrate(&mut self.pv, clock, &mut self.hb);
            self.pv.put(Ch::CalibRequest, 0.0);
            return self.after_calibration("calibration", outcome);
        }

        if self.locker.shared().features.use_secondary_calibration
            && self.pv.get(Ch::SecondaryEnable) != 0.0
        {
            self.pv.report(2, "secondary calibration");
            self.pv.put(Ch::LaserOk, 0.0);
            self.pv.put(Ch::Busy, 1.0);
            let outcome = self.locker.second_calibrate(&mut self.pv, clock, &mut self.hb);
            self.pv.put(Ch::SecondaryEnable, 0.0);
            return self.after_calibration("secondary calibration", outcome);
        }

        self.locker.check_jump(&mut self.pv, clock);
        let jump = self.locker.jump();
        if self.pv.get(Ch::FixBucket) != 0.0
            && jump.is_actionable()
            && self.pv.get(Ch::EnableTimeCtrl) != 0.0
        {
            self.pv.put(Ch::LaserOk, 0.0);
            self.pv.put(Ch::Busy, 1.0);
            self.locker.fix_jump(&mut self.pv, clock);
        }
        self.locker.shared().publish_jump(&mut self.pv);
        self.pv.put(Ch::LaserOk, 1.0);

        if self.pv.get(Ch::EnableTimeCtrl) != 0.0 {
            self.locker.set_time(&mut self.pv, clock);
        }
        self.degrees.run(&mut self.pv);
        Ok(CycleStatus::Continue)
    }

    fn after_calibration(
        &mut self,
        what: &'static str,
        outcome: CalibOutcome,
    ) -> eyre::Result<CycleStatus> {
        self.pv.put(Ch::Busy, 0.0);
        match outcome {
            CalibOutcome::Complete { rms_ns } => {
                info!(what, rms_ns, "calibration complete");
                Ok(CycleStatus::Continue)
            }
            CalibOutcome::Cancelled => {
                info!(what, "calibration cancelled");
                Ok(CycleStatus::Continue)
            }
            CalibOutcome::HeartbeatLost => {
                error!(what, "heartbeat lost during calibration");
                Ok(CycleStatus::Fatal)
            }
            CalibOutcome::Failed(reason) => {
                warn!(what, reason, "calibration failed");
                self.pv.report(1, reason);
                Ok(CycleStatus::Continue)
            }
        }
    }
}

/// Run monitor cycles until a fatal heartbeat verdict or `shutdown` is set.
/// An error escaping a cycle tears the session down and reconnects; a failed
/// reconnect is the only error this function surfaces.
pub fn run<F>(
    mut connect: F,
    cfg: &Config,
    clock: &dyn Clock,
    shutdown: &AtomicBool,
) -> eyre::Result<()>
where
    F: FnMut() -> eyre::Result<Box<dyn Channels + Send>>,
{
    let poll = Duration::from_millis(cfg.loop_cfg.poll_ms);
    'session: loop {
        let io = connect().wrap_err("control-point layer unavailable")?;
        let Some(mut session) = Session::connect(io, cfg, clock) else {
            return Ok(());
        };
        info!(name = %cfg.locker.name, "session established");
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("operator shutdown");
                session.pv.report(1, "shutting down");
                return Ok(());
            }
            clock.sleep(poll);
            match session.cycle(cfg, clock) {
                Ok(CycleStatus::Continue) => {}
                Ok(CycleStatus::Fatal) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "cycle failed, rebuilding session");
                    continue 'session;
                }
            }
        }
    }
}
