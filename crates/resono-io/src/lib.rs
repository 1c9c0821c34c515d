//! Resono I/O - the hardware boundary.
//!
//! [`DeviceIo`] wraps one opened sound device behind a [`PcmHandle`] and
//! owns the state that lives at that boundary: the CPU-side staging
//! buffer, the free-run state machine that keeps an idle output device
//! fed with silence, underrun recovery, and volume application.
//!
//! The actual kernel interface is abstracted as [`PcmHandle`]; the crate
//! ships [`LoopbackPcm`], a byte-ring implementation with explicit
//! application and hardware pointers that the test suites drive by hand.

pub mod device;
pub mod loopback;
pub mod pcm;

pub use device::{DeviceIo, Direction, RateEstimator, VolumeMixer};
pub use loopback::LoopbackPcm;
pub use pcm::{PcmError, PcmHandle, PcmState};

use thiserror::Error;

/// Errors surfaced by the device layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// An operation needed state that is not present (format, open handle).
    #[error("invalid device state: {0}")]
    Invalid(String),
    /// The hardware reported the application fell severely behind.
    #[error("severe underrun")]
    SevereUnderrun,
    /// A PCM operation failed.
    #[error(transparent)]
    Pcm(#[from] PcmError),
}
