#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and channel-name expansion for the laser-locking engine.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Channel names are expanded from a `device_base` prefix plus a small set
//!   of explicitly named points (actuator, trigger, counter), matching how
//!   installations describe themselves.

use serde::Deserialize;

/// Which locker hardware generation this installation runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    #[default]
    Gen1,
    Gen2,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockerCfg {
    /// Installation name used in diagnostics.
    pub name: String,
    /// Hardware generation selector.
    #[serde(default)]
    pub generation: Generation,
    /// Control-point access timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Trigger channel reports ticks of the 119 MHz event clock instead of ns.
    #[serde(default)]
    pub trig_in_ticks: bool,
    /// Laser pulse starts the interval counter and the trigger stops it, so
    /// published times count down as the laser moves later.
    #[serde(default = "default_true")]
    pub reverse_counter: bool,
    /// Reference frequency (GHz) for the degrees/ns conversion pair.
    #[serde(default = "default_deg_freq")]
    pub deg_conversion_freq_ghz: f64,
    /// Where timer jitter statistics come from.
    #[serde(default)]
    pub timer_stats: TimerStats,
}

/// Source of the arrival-timer jitter figure used by the stability gate.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimerStats {
    /// Instrument publishes its own jitter channel.
    #[default]
    Onboard,
    /// Derive jitter from the spread of recent readings.
    Derived,
}

fn default_timeout_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_deg_freq() -> f64 {
    2.856
}

/// Optional feedback-law layers, resolved once at locker construction.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct FeatureCfg {
    pub use_drift_correction: bool,
    pub use_secondary_calibration: bool,
    pub use_dither: bool,
    /// Converts the raw drift signal to ns before gain and smoothing.
    pub drift_multiplier: f64,
}

impl Default for FeatureCfg {
    fn default() -> Self {
        Self {
            use_drift_correction: false,
            use_secondary_calibration: false,
            use_dither: false,
            drift_multiplier: 1.0e-6,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct LoopCfg {
    /// Supervisor poll period in milliseconds.
    pub poll_ms: u64,
    /// Extra pause after a failed status gate, before the next cycle.
    pub not_ok_backoff_ms: u64,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            poll_ms: 200,
            not_ok_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelsCfg {
    /// Prefix for the locker's own control points (target time, calibration
    /// constants, flags, telemetry).
    pub device_base: String,
    /// Phase actuator control point (setpoint; readback and done-moving flag
    /// are derived with `.RBV` / `.DMOV` suffixes).
    pub phase_motor: String,
    /// Coarse trigger time control point.
    pub laser_trigger: String,
    /// Trigger pulse-width control point. Required on Gen2, where calibration
    /// widens the gate while sweeping.
    #[serde(default)]
    pub laser_trigger_width: Option<String>,
    /// Prefix for the interval-counter records (mean, limits, jitter).
    pub counter: String,
    /// External drift-monitor points, required when drift correction is on.
    #[serde(default)]
    pub drift: Option<DriftChannelsCfg>,
    /// Cross-check instrument points, required when secondary calibration is
    /// on.
    #[serde(default)]
    pub secondary: Option<SecondaryChannelsCfg>,
    /// Dither amplitude point, required when dither is on.
    #[serde(default)]
    pub dither_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriftChannelsCfg {
    /// Raw drift measurement to read.
    pub signal: String,
    /// Published smoothed reading, ns.
    pub value: String,
    /// Operator-set offset, ns.
    pub offset: String,
    /// Gain term; zero disables without reconfiguring.
    pub gain: String,
    /// Exponential smoothing weight.
    pub smoothing: String,
    /// Accumulation enable for the integrating term.
    pub accum: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecondaryChannelsCfg {
    /// Independent arrival-time sample.
    pub sample: String,
    /// Operator enable for applying the fit.
    pub enable: String,
    /// Published sine coefficient of the harmonic fit.
    pub sin: String,
    /// Published cosine coefficient of the harmonic fit.
    pub cos: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub locker: LockerCfg,
    #[serde(default)]
    pub features: FeatureCfg,
    #[serde(rename = "loop", default)]
    pub loop_cfg: LoopCfg,
    pub channels: ChannelsCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Parse and validate a config document.
pub fn load(s: &str) -> eyre::Result<Config> {
    let cfg = load_toml(s).map_err(|e| eyre::eyre!("config parse error: {e}"))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.locker.name.trim().is_empty() {
            eyre::bail!("locker.name must not be empty");
        }
        if self.locker.timeout_ms == 0 {
            eyre::bail!("locker.timeout_ms must be >= 1");
        }
        if !self.locker.deg_conversion_freq_ghz.is_finite()
            || self.locker.deg_conversion_freq_ghz <= 0.0
        {
            eyre::bail!("locker.deg_conversion_freq_ghz must be a positive frequency");
        }
        if self.loop_cfg.poll_ms == 0 {
            eyre::bail!("loop.poll_ms must be >= 1");
        }
        for (field, value) in [
            ("channels.device_base", &self.channels.device_base),
            ("channels.phase_motor", &self.channels.phase_motor),
            ("channels.laser_trigger", &self.channels.laser_trigger),
            ("channels.counter", &self.channels.counter),
        ] {
            if value.trim().is_empty() {
                eyre::bail!("{field} must not be empty");
            }
        }
        if self.features.use_drift_correction && self.channels.drift.is_none() {
            eyre::bail!("features.use_drift_correction requires [channels.drift]");
        }
        if self.features.use_secondary_calibration && self.channels.secondary.is_none() {
            eyre::bail!("features.use_secondary_calibration requires [channels.secondary]");
        }
        if self.features.use_dither && self.channels.dither_level.is_none() {
            eyre::bail!("features.use_dither requires channels.dither_level");
        }
        if self.locker.generation == Generation::Gen2 && self.channels.laser_trigger_width.is_none()
        {
            eyre::bail!("gen2 lockers require channels.laser_trigger_width");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [locker]
        name = "sim"

        [channels]
        device_base = "LOCK:SIM:01:"
        phase_motor = "LOCK:SIM:01:PHASE"
        laser_trigger = "TRIG:SIM:01:TDES"
        counter = "CNTR:SIM:01:TIME"
    "#;

    #[test]
    fn minimal_config_defaults() {
        let cfg = load(MINIMAL).unwrap();
        assert_eq!(cfg.locker.generation, Generation::Gen1);
        assert_eq!(cfg.locker.timeout_ms, 1_000);
        assert!(!cfg.features.use_drift_correction);
        assert_eq!(cfg.loop_cfg.poll_ms, 200);
        assert_eq!(cfg.locker.timer_stats, TimerStats::Onboard);
    }

    #[test]
    fn generation_tag_parses() {
        let doc = MINIMAL
            .replace("name = \"sim\"", "name = \"sim\"\ngeneration = \"gen2\"")
            .replace(
                "counter = ",
                "laser_trigger_width = \"TRIG:SIM:01:TWID\"\ncounter = ",
            );
        let cfg = load(&doc).unwrap();
        assert_eq!(cfg.locker.generation, Generation::Gen2);
        assert!(cfg.channels.laser_trigger_width.is_some());
    }

    #[test]
    fn feature_flags_demand_their_channels() {
        let doc = format!("{MINIMAL}\n[features]\nuse_drift_correction = true\n");
        let err = load(&doc).unwrap_err();
        assert!(err.to_string().contains("channels.drift"));
    }
}
