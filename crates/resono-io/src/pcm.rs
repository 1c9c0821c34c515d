//! The PCM handle contract.
//!
//! Everything the device layer needs from the kernel side, expressed over
//! a byte ring with separate application and hardware pointers. Offsets
//! are in frames; the ring itself is exposed as bytes for zero fills and
//! staging copies.

use resono_dsp::AudioFormat;
use std::time::Instant;
use thiserror::Error;

/// Errors from PCM operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PcmError {
    /// The application fell behind by more than the severe-underrun
    /// threshold (the `-EPIPE` condition).
    #[error("severe underrun reported by the PCM")]
    SevereUnderrun,
    /// The device is suspended and needs a resume attempt.
    #[error("PCM is suspended")]
    Suspended,
    /// Anything else the handle could not do.
    #[error("PCM operation failed: {0}")]
    Failed(String),
}

/// Coarse PCM substates, mirroring the kernel's notion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    /// Handle exists but hardware parameters are not set.
    Open,
    /// Parameters set, not yet prepared.
    Setup,
    /// Ready to start.
    Prepared,
    /// Transferring audio.
    Running,
    /// Stopped on underrun/overrun.
    Xrun,
    /// Power-suspended.
    Suspended,
    /// Device went away.
    Disconnected,
}

/// One opened PCM device.
///
/// The contract is deliberately narrow: hardware/software parameter setup,
/// pointer-based ring access (`mmap_begin`/`mmap_commit`), whole-ring
/// access for silence fills, and application-pointer repositioning used by
/// free-run and underrun recovery.
pub trait PcmHandle: Send {
    /// Sets hardware parameters. Called once per open; the buffer size is
    /// in frames. `dma_period_us` requests a specific DMA period where
    /// the platform declares one.
    fn set_hwparams(
        &mut self,
        format: &AudioFormat,
        buffer_size: usize,
        period_wakeup: bool,
        dma_period_us: Option<u32>,
    ) -> Result<(), PcmError>;

    /// Sets software parameters (start/stop thresholds, timestamping).
    fn set_swparams(&mut self) -> Result<(), PcmError>;

    /// Writable space in frames (`avail`), plus a monotonic timestamp.
    ///
    /// Reports [`PcmError::SevereUnderrun`] when the application pointer
    /// trails the hardware pointer by more than `severe_underrun_frames`.
    fn avail_frames(
        &mut self,
        buffer_size: usize,
        severe_underrun_frames: usize,
    ) -> Result<(usize, Instant), PcmError>;

    /// Begins an mmap transfer of up to `frames` frames. Returns the ring
    /// offset (in frames) and the contiguous frame count granted.
    fn mmap_begin(&mut self, frames: usize) -> Result<(usize, usize), PcmError>;

    /// Commits `frames` frames at `offset`, advancing the application
    /// pointer.
    fn mmap_commit(&mut self, offset: usize, frames: usize) -> Result<(), PcmError>;

    /// The whole ring as bytes, for zero fills and staging copies.
    fn ring_bytes(&mut self) -> &mut [u8];

    /// Bytes per frame for the configured format.
    fn frame_bytes(&self) -> usize;

    /// Moves the application pointer to `ahead_frames` ahead of the
    /// hardware pointer. Returns how far forward the pointer actually
    /// moved (zero when it was already at or past the target).
    fn resume_appl_ptr(&mut self, ahead_frames: usize) -> Result<usize, PcmError>;

    /// Reads the channel map, one slot per channel.
    fn get_channel_map(&mut self) -> Result<Vec<u32>, PcmError>;

    /// Installs a channel map.
    fn set_channel_map(&mut self, map: &[u32]) -> Result<(), PcmError>;

    /// Starts the transfer clock.
    fn start(&mut self) -> Result<(), PcmError>;

    /// Current device state.
    fn state(&self) -> PcmState;

    /// Tries to bring a suspended device back.
    fn attempt_resume(&mut self) -> Result<(), PcmError>;
}

// Boxed handles delegate, so `DeviceIo<Box<dyn PcmHandle>>` works for
// callers that pick the concrete handle at runtime.
impl PcmHandle for Box<dyn PcmHandle> {
    fn set_hwparams(
        &mut self,
        format: &AudioFormat,
        buffer_size: usize,
        period_wakeup: bool,
        dma_period_us: Option<u32>,
    ) -> Result<(), PcmError> {
        (**self).set_hwparams(format, buffer_size, period_wakeup, dma_period_us)
    }

    fn set_swparams(&mut self) -> Result<(), PcmError> {
        (**self).set_swparams()
    }

    fn avail_frames(
        &mut self,
        buffer_size: usize,
        severe_underrun_frames: usize,
    ) -> Result<(usize, Instant), PcmError> {
        (**self).avail_frames(buffer_size, severe_underrun_frames)
    }

    fn mmap_begin(&mut self, frames: usize) -> Result<(usize, usize), PcmError> {
        (**self).mmap_begin(frames)
    }

    fn mmap_commit(&mut self, offset: usize, frames: usize) -> Result<(), PcmError> {
        (**self).mmap_commit(offset, frames)
    }

    fn ring_bytes(&mut self) -> &mut [u8] {
        (**self).ring_bytes()
    }

    fn frame_bytes(&self) -> usize {
        (**self).frame_bytes()
    }

    fn resume_appl_ptr(&mut self, ahead_frames: usize) -> Result<usize, PcmError> {
        (**self).resume_appl_ptr(ahead_frames)
    }

    fn get_channel_map(&mut self) -> Result<Vec<u32>, PcmError> {
        (**self).get_channel_map()
    }

    fn set_channel_map(&mut self, map: &[u32]) -> Result<(), PcmError> {
        (**self).set_channel_map(map)
    }

    fn start(&mut self) -> Result<(), PcmError> {
        (**self).start()
    }

    fn state(&self) -> PcmState {
        (**self).state()
    }

    fn attempt_resume(&mut self) -> Result<(), PcmError> {
        (**self).attempt_resume()
    }
}
