#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Laser arrival-time locking engine (hardware-agnostic).
//!
//! Synchronizes a mode-locked laser's optical pulse arrival to a facility RF
//! reference at sub-picosecond precision. All physical I/O goes through
//! `locker_traits::Channels`; which concrete control points exist is resolved
//! by the `pv` module from the configuration.
//!
//! ## Architecture
//!
//! - **Sawtooth model** (`sawtooth`): predicts timer readings from actuator
//!   phase, trigger time, and calibration constants
//! - **Filtered timer** (`timer`): validates raw arrival-time readings and
//!   tracks short-term stability
//! - **Locker** (`locker`): per-generation calibration, bucket-jump
//!   detect/fix, and the `set_time` feedback law
//! - **Supervisor** (`supervisor`): monitor loop with heartbeat, status gate,
//!   and session rebuild on failure
//!
//! Everything works in nanoseconds internally; the `motor`, `trigger`, and
//! `degrees` modules own the unit conversions at the hardware boundaries.

pub mod degrees;
pub mod drift;
pub mod error;
pub mod heartbeat;
pub mod locker;
pub mod math;
pub mod motor;
pub mod profile;
pub mod pv;
pub mod ring;
pub mod sawtooth;
pub mod supervisor;
pub mod timer;
pub mod trigger;

pub use error::{LockerError, Result};
pub use locker::{CalibOutcome, CalibrationState, Locker, StatusReport};
pub use profile::{Features, HardwareProfile};
pub use pv::{Ch, PvTable};
pub use supervisor::{CycleStatus, Session};
