//! Logical control points and their expansion to concrete channel names.
//!
//! The rest of the crate addresses channels through the [`Ch`] enum; only this
//! module knows how a logical point maps onto an installation's record names.
//! Reads and writes are deliberately soft: a failed access is logged and the
//! loop carries on with a neutral value, because a flaky gateway must degrade
//! the lock, not kill the process. The one exception is [`PvTable::try_get`],
//! used where the caller needs to tell "read failed" apart from a real value.

use std::collections::HashMap;
use std::time::Duration;

use locker_config::Config;
use locker_traits::Channels;
use tracing::{debug, warn};

/// Status-line text longer than this is cut before publishing.
const MAX_MESSAGE_LEN: usize = 25;

/// Logical control points of one locker installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ch {
    // Locker-owned points under the device base.
    Watchdog,
    OscTargetFreq,
    TargetTime,
    TargetTimeHigh,
    TargetTimeLow,
    CalibRequest,
    EnableTimeCtrl,
    Busy,
    TimingError,
    LaserOk,
    FixBucket,
    Delay,
    Offset,
    EnableTrigger,
    BucketError,
    BucketCounter,
    UnfixedError,
    CalibError,
    PhaseScale,
    DegSband,
    DegOffset,
    NsOffset,
    FreqSetpoint,
    FreqError,
    FreqCounter,
    RfPower,
    RfPowerLow,
    RfPowerHigh,
    DiodePower,
    DiodePowerLow,
    DiodePowerHigh,
    LaserLocked,
    LockEnable,
    /// Free-text status line.
    Status,
    // Interval-counter records.
    Counter,
    CounterLow,
    CounterHigh,
    CounterJitter,
    CounterJitterHigh,
    // Actuator and trigger.
    PhaseMotor,
    PhaseMotorRb,
    PhaseMotorDmov,
    LaserTrigger,
    LaserTriggerWidth,
    // Optional feature groups.
    DriftSignal,
    DriftValue,
    DriftOffset,
    DriftGain,
    DriftSmoothing,
    DriftAccum,
    SecondarySample,
    SecondaryEnable,
    SecondarySin,
    SecondaryCos,
    DitherLevel,
}

/// Maps logical points to concrete channel names for one installation.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    names: HashMap<Ch, String>,
}

impl ChannelMap {
    /// Expand all channel names from the configured prefixes and points.
    /// Feature groups are only present when their config section is.
    pub fn from_config(cfg: &Config) -> Self {
        let base = &cfg.channels.device_base;
        let mut names = HashMap::new();
        let mut dev = |ch: Ch, suffix: &str| {
            names.insert(ch, format!("{base}{suffix}"));
        };
        dev(Ch::Watchdog, "FS_WATCHDOG");
        dev(Ch::OscTargetFreq, "FS_OSC_TGT_FREQ");
        dev(Ch::TargetTime, "FS_TGT_TIME");
        dev(Ch::TargetTimeHigh, "FS_TGT_TIME.HIHI");
        dev(Ch::TargetTimeLow, "FS_TGT_TIME.LOLO");
        dev(Ch::CalibRequest, "FS_START_CALIB");
        dev(Ch::EnableTimeCtrl, "FS_ENABLE_TIME_CTRL");
        dev(Ch::Busy, "FS_CTRL_BUSY");
        dev(Ch::TimingError, "FS_TIMING_ERROR");
        dev(Ch::LaserOk, "FS_LASER_OK");
        dev(Ch::FixBucket, "FS_ENABLE_BUCKET_FIX");
        dev(Ch::Delay, "FS_TRIGGER_DELAY");
        dev(Ch::Offset, "FS_TIMING_OFFSET");
        dev(Ch::EnableTrigger, "FS_ENABLE_TRIGGER");
        dev(Ch::BucketError, "FS_BUCKET_ERROR");
        dev(Ch::BucketCounter, "FS_CORRECTION_CNT");
        dev(Ch::UnfixedError, "FS_UNFIXED_ERROR");
        dev(Ch::CalibError, "FS_CALIB_ERROR");
        dev(Ch::PhaseScale, "FS_PHASE_SCALE");
        dev(Ch::DegSband, "PDES");
        dev(Ch::DegOffset, "POC");
        dev(Ch::NsOffset, "FS_NS_OFFSET");
        dev(Ch::FreqSetpoint, "FREQ_SP");
        dev(Ch::FreqError, "FREQ_ERR");
        dev(Ch::FreqCounter, "FREQ_CUR");
        dev(Ch::RfPower, "CH1_RF_PWR");
        dev(Ch::RfPowerLow, "CH1_RF_PWR.LOLO");
        dev(Ch::RfPowerHigh, "CH1_RF_PWR.HIHI");
        dev(Ch::DiodePower, "CH1_DIODE_PWR");
        dev(Ch::DiodePowerLow, "CH1_DIODE_PWR.LOLO");
        dev(Ch::DiodePowerHigh, "CH1_DIODE_PWR.HIHI");
        dev(Ch::LaserLocked, "PHASE_LOCKED");
        dev(Ch::LockEnable, "RF_LOCK_ENABLE");
        dev(Ch::Status, "FS_STATUS");

        let counter = &cfg.channels.counter;
        let mean = if cfg.locker.reverse_counter {
            "GetOffsetInvMeasMean"
        } else {
            "GetMeasMean"
        };
        names.insert(Ch::Counter, format!("{counter}{mean}"));
        names.insert(Ch::CounterLow, format!("{counter}{mean}.LOW"));
        names.insert(Ch::CounterHigh, format!("{counter}{mean}.HIGH"));
        names.insert(Ch::CounterJitter, format!("{counter}GetMeasJitter"));
        names.insert(Ch::CounterJitterHigh, format!("{counter}GetMeasJitter.HIGH"));

        let motor = &cfg.channels.phase_motor;
        names.insert(Ch::PhaseMotor, motor.clone());
        names.insert(Ch::PhaseMotorRb, format!("{motor}.RBV"));
        names.insert(Ch::PhaseMotorDmov, format!("{motor}.DMOV"));
        names.insert(Ch::LaserTrigger, cfg.channels.laser_trigger.clone());
        if let Some(width) = &cfg.channels.laser_trigger_width {
            names.insert(Ch::LaserTriggerWidth, width.clone());
        }

        if let Some(drift) = &cfg.channels.drift {
            names.insert(Ch::DriftSignal, drift.signal.clone());
            names.insert(Ch::DriftValue, drift.value.clone());
            names.insert(Ch::DriftOffset, drift.offset.clone());
            names.insert(Ch::DriftGain, drift.gain.clone());
            names.insert(Ch::DriftSmoothing, drift.smoothing.clone());
            names.insert(Ch::DriftAccum, drift.accum.clone());
        }
        if let Some(sec) = &cfg.channels.secondary {
            names.insert(Ch::SecondarySample, sec.sample.clone());
            names.insert(Ch::SecondaryEnable, sec.enable.clone());
            names.insert(Ch::SecondarySin, sec.sin.clone());
            names.insert(Ch::SecondaryCos, sec.cos.clone());
        }
        if let Some(dither) = &cfg.channels.dither_level {
            names.insert(Ch::DitherLevel, dither.clone());
        }

        Self { names }
    }

    pub fn name(&self, ch: Ch) -> Option<&str> {
        self.names.get(&ch).map(String::as_str)
    }
}

/// Channel I/O front end used by every component of the engine.
pub struct PvTable {
    io: Box<dyn Channels + Send>,
    map: ChannelMap,
    timeout: Duration,
}

impl PvTable {
    pub fn new(io: Box<dyn Channels + Send>, cfg: &Config) -> Self {
        Self {
            io,
            map: ChannelMap::from_config(cfg),
            timeout: Duration::from_millis(cfg.locker.timeout_ms),
        }
    }

    /// Read a channel, treating any failure as 0.0 after logging it.
    pub fn get(&mut self, ch: Ch) -> f64 {
        match self.try_get(ch) {
            Ok(v) => v,
            Err(e) => {
                warn!(channel = ?ch, error = %e, "read failed, using 0.0");
                0.0
            }
        }
    }

    /// Read a channel, surfacing the failure to the caller.
    pub fn try_get(&mut self, ch: Ch) -> eyre::Result<f64> {
        let name = self
            .map
            .name(ch)
            .ok_or_else(|| eyre::eyre!("channel {ch:?} not configured"))?;
        self.io
            .get(name, self.timeout)
            .map_err(|e| eyre::eyre!("get {name}: {e}"))
    }

    /// Write a channel; failures are logged and otherwise ignored.
    pub fn put(&mut self, ch: Ch, value: f64) {
        let Some(name) = self.map.name(ch) else {
            warn!(channel = ?ch, "write to unconfigured channel dropped");
            return;
        };
        if let Err(e) = self.io.put(name, value, self.timeout) {
            warn!(channel = ?ch, error = %e, "write failed");
        }
    }

    /// Publish a status line, truncated to the display width of the status
    /// record. Severity 1 is operator-visible, higher levels are diagnostics.
    pub fn report(&mut self, severity: u8, message: &str) {
        let text: String = message.chars().take(MAX_MESSAGE_LEN).collect();
        match severity {
            0 | 1 => warn!(status = %text, "{message}"),
            _ => debug!(status = %text, "{message}"),
        }
        let Some(name) = self.map.name(Ch::Status) else {
            return;
        };
        if let Err(e) = self.io.put_text(name, &text, self.timeout) {
            debug!(error = %e, "status publish failed");
        }
    }
}

impl std::fmt::Debug for PvTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PvTable")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(extra: &str) -> Config {
        let doc = format!(
            r#"
            [locker]
            name = "sim"
            {extra}

            [channels]
            device_base = "LOCK:SIM:01:"
            phase_motor = "LOCK:SIM:01:PHASE"
            laser_trigger = "TRIG:SIM:01:TDES"
            counter = "CNTR:SIM:01:"
            "#
        );
        locker_config::load_toml(&doc).unwrap()
    }

    #[test]
    fn device_base_expansion() {
        let map = ChannelMap::from_config(&cfg(""));
        assert_eq!(map.name(Ch::TargetTime), Some("LOCK:SIM:01:FS_TGT_TIME"));
        assert_eq!(
            map.name(Ch::BucketCounter),
            Some("LOCK:SIM:01:FS_CORRECTION_CNT")
        );
        assert_eq!(map.name(Ch::PhaseMotorRb), Some("LOCK:SIM:01:PHASE.RBV"));
        assert_eq!(map.name(Ch::DriftSignal), None);
    }

    #[test]
    fn counter_records_follow_direction() {
        let reversed = ChannelMap::from_config(&cfg(""));
        assert_eq!(
            reversed.name(Ch::Counter),
            Some("CNTR:SIM:01:GetOffsetInvMeasMean")
        );
        let forward = ChannelMap::from_config(&cfg("reverse_counter = false"));
        assert_eq!(forward.name(Ch::Counter), Some("CNTR:SIM:01:GetMeasMean"));
        assert_eq!(
            forward.name(Ch::CounterJitterHigh),
            Some("CNTR:SIM:01:GetMeasJitter.HIGH")
        );
    }

    #[derive(Default)]
    struct Recorder {
        texts: std::sync::Arc<std::sync::Mutex<Vec<(String, String)>>>,
    }

    impl Channels for Recorder {
        fn get(
            &mut self,
            _name: &str,
            _timeout: Duration,
        ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
            Ok(7.25)
        }

        fn put(
            &mut self,
            _name: &str,
            _value: f64,
            _timeout: Duration,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        fn put_text(
            &mut self,
            name: &str,
            value: &str,
            _timeout: Duration,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.texts
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string()));
            Ok(())
        }
    }

    #[test]
    fn status_lines_are_truncated() {
        let rec = Recorder::default();
        let texts = rec.texts.clone();
        let mut pv = PvTable::new(Box::new(rec), &cfg(""));
        pv.report(2, "calibration started on a very long message");
        pv.report(1, "ok");
        let texts = texts.lock().unwrap();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].0, "LOCK:SIM:01:FS_STATUS");
        assert_eq!(texts[0].1.chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(texts[1].1, "ok");
    }

    #[test]
    fn unconfigured_channel_reads_as_zero() {
        let mut pv = PvTable::new(Box::new(Recorder::default()), &cfg(""));
        assert!(pv.try_get(Ch::DitherLevel).is_err());
        assert_eq!(pv.get(Ch::DitherLevel), 0.0);
        assert_eq!(pv.get(Ch::TargetTime), 7.25);
    }
}
