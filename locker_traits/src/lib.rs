pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Named control-point access. All physical I/O in the locking engine goes
/// through this boundary; implementations own connection lifecycle.
pub trait Channels {
    /// Read a numeric control point.
    fn get(
        &mut self,
        name: &str,
        timeout: std::time::Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;

    /// Write a numeric control point.
    fn put(
        &mut self,
        name: &str,
        value: f64,
        timeout: std::time::Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Write a string control point (status/diagnostic text).
    fn put_text(
        &mut self,
        name: &str,
        value: &str,
        timeout: std::time::Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
