use thiserror::Error;

/// Typed failure categories for the locking engine.
///
/// Transient control-point I/O never surfaces here; the PV layer absorbs it
/// with a default value and a log line. Everything that does surface is either
/// handled in the cycle (status gate, rejected measurements, cancelled
/// calibrations travel as typed statuses, not errors) or reaches the
/// supervisor's blanket recovery as an unanticipated error.
#[derive(Debug, Error, Clone)]
pub enum LockerError {
    #[error("calibration failed: {0}")]
    Calibration(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
