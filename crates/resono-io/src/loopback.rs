//! In-memory PCM handle for tests and offline use.
//!
//! A byte ring with explicit application and hardware pointers. Nothing
//! moves on its own: tests advance the hardware pointer with
//! [`consume`](LoopbackPcm::consume) to simulate playback and inspect the
//! ring directly.

use crate::pcm::{PcmError, PcmHandle, PcmState};
use resono_dsp::AudioFormat;
use std::time::Instant;

/// Loopback PCM: the ring is ordinary memory and both pointers are plain
/// counters in frames (monotonic; ring position is the modulo).
pub struct LoopbackPcm {
    ring: Vec<u8>,
    buffer_size: usize,
    frame_bytes: usize,
    appl_ptr: u64,
    hw_ptr: u64,
    state: PcmState,
    channel_map: Vec<u32>,
}

impl LoopbackPcm {
    /// Creates a handle; the ring is sized at `set_hwparams` time.
    pub fn new() -> Self {
        Self {
            ring: Vec::new(),
            buffer_size: 0,
            frame_bytes: 0,
            appl_ptr: 0,
            hw_ptr: 0,
            state: PcmState::Open,
            channel_map: Vec::new(),
        }
    }

    /// Simulates the hardware playing (or capturing) `frames` frames.
    pub fn consume(&mut self, frames: usize) {
        self.hw_ptr += frames as u64;
    }

    /// Frames queued between the application and hardware pointers.
    pub fn level(&self) -> usize {
        (self.appl_ptr - self.hw_ptr) as usize
    }

    /// Current application pointer (monotonic frames).
    pub fn appl_ptr(&self) -> u64 {
        self.appl_ptr
    }

    /// Current hardware pointer (monotonic frames).
    pub fn hw_ptr(&self) -> u64 {
        self.hw_ptr
    }

    /// Forces the queued level to `frames` by moving the hardware pointer.
    pub fn set_level(&mut self, frames: usize) {
        assert!(self.appl_ptr >= frames as u64, "level exceeds written data");
        self.hw_ptr = self.appl_ptr - frames as u64;
    }

    /// True if every byte in the ring is zero.
    pub fn ring_is_silent(&self) -> bool {
        self.ring.iter().all(|&b| b == 0)
    }

    fn configured(&self) -> Result<(), PcmError> {
        if self.buffer_size == 0 {
            return Err(PcmError::Failed("hwparams not set".into()));
        }
        Ok(())
    }
}

impl Default for LoopbackPcm {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmHandle for LoopbackPcm {
    fn set_hwparams(
        &mut self,
        format: &AudioFormat,
        buffer_size: usize,
        _period_wakeup: bool,
        _dma_period_us: Option<u32>,
    ) -> Result<(), PcmError> {
        self.frame_bytes = format.frame_bytes();
        self.buffer_size = buffer_size;
        self.ring = vec![0; buffer_size * self.frame_bytes];
        self.channel_map = (0..format.num_channels as u32).collect();
        self.state = PcmState::Setup;
        Ok(())
    }

    fn set_swparams(&mut self) -> Result<(), PcmError> {
        self.configured()?;
        self.state = PcmState::Prepared;
        Ok(())
    }

    fn avail_frames(
        &mut self,
        buffer_size: usize,
        severe_underrun_frames: usize,
    ) -> Result<(usize, Instant), PcmError> {
        self.configured()?;
        // The hardware running past the application pointer by more than
        // the threshold is the severe condition.
        if self.hw_ptr > self.appl_ptr
            && (self.hw_ptr - self.appl_ptr) as usize > severe_underrun_frames
        {
            return Err(PcmError::SevereUnderrun);
        }
        let queued = self.appl_ptr.saturating_sub(self.hw_ptr) as usize;
        Ok((buffer_size.saturating_sub(queued), Instant::now()))
    }

    fn mmap_begin(&mut self, frames: usize) -> Result<(usize, usize), PcmError> {
        self.configured()?;
        let queued = self.appl_ptr.saturating_sub(self.hw_ptr) as usize;
        let avail = self.buffer_size.saturating_sub(queued);
        let offset = (self.appl_ptr % self.buffer_size as u64) as usize;
        let contiguous = self.buffer_size - offset;
        Ok((offset, frames.min(avail).min(contiguous)))
    }

    fn mmap_commit(&mut self, _offset: usize, frames: usize) -> Result<(), PcmError> {
        self.configured()?;
        self.appl_ptr += frames as u64;
        Ok(())
    }

    fn ring_bytes(&mut self) -> &mut [u8] {
        &mut self.ring
    }

    fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    fn resume_appl_ptr(&mut self, ahead_frames: usize) -> Result<usize, PcmError> {
        self.configured()?;
        let target = self.hw_ptr + ahead_frames as u64;
        let displacement = target.saturating_sub(self.appl_ptr) as usize;
        self.appl_ptr = target;
        Ok(displacement)
    }

    fn get_channel_map(&mut self) -> Result<Vec<u32>, PcmError> {
        self.configured()?;
        Ok(self.channel_map.clone())
    }

    fn set_channel_map(&mut self, map: &[u32]) -> Result<(), PcmError> {
        self.configured()?;
        self.channel_map = map.to_vec();
        Ok(())
    }

    fn start(&mut self) -> Result<(), PcmError> {
        self.configured()?;
        self.state = PcmState::Running;
        Ok(())
    }

    fn state(&self) -> PcmState {
        self.state
    }

    fn attempt_resume(&mut self) -> Result<(), PcmError> {
        if self.state == PcmState::Suspended {
            self.state = PcmState::Prepared;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resono_dsp::SampleFormat;

    fn configured() -> LoopbackPcm {
        let mut pcm = LoopbackPcm::new();
        let format = AudioFormat::new(48000, 2, SampleFormat::S16Le);
        pcm.set_hwparams(&format, 1024, false, None).unwrap();
        pcm.set_swparams().unwrap();
        pcm
    }

    #[test]
    fn avail_tracks_pointers() {
        let mut pcm = configured();
        let (avail, _) = pcm.avail_frames(1024, 48000 * 5).unwrap();
        assert_eq!(avail, 1024);

        let (offset, granted) = pcm.mmap_begin(100).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(granted, 100);
        pcm.mmap_commit(offset, 100).unwrap();

        let (avail, _) = pcm.avail_frames(1024, 48000 * 5).unwrap();
        assert_eq!(avail, 924);
        assert_eq!(pcm.level(), 100);

        pcm.consume(60);
        assert_eq!(pcm.level(), 40);
    }

    #[test]
    fn mmap_begin_clips_at_ring_end() {
        let mut pcm = configured();
        // Fill to 1000, play everything back, then ask near the seam.
        pcm.mmap_commit(0, 1000).unwrap();
        pcm.consume(1000);
        let (offset, granted) = pcm.mmap_begin(200).unwrap();
        assert_eq!(offset, 1000 % 1024);
        assert_eq!(granted, 24);
    }

    #[test]
    fn severe_underrun_when_hw_runs_far_ahead() {
        let mut pcm = configured();
        pcm.mmap_commit(0, 100).unwrap();
        pcm.consume(100 + 300);
        assert_eq!(
            pcm.avail_frames(1024, 200).unwrap_err(),
            PcmError::SevereUnderrun
        );
    }

    #[test]
    fn resume_reports_forward_displacement() {
        let mut pcm = configured();
        pcm.mmap_commit(0, 10).unwrap();
        pcm.consume(10);
        let moved = pcm.resume_appl_ptr(240).unwrap();
        assert_eq!(moved, 240);
        assert_eq!(pcm.level(), 240);

        // Already past the target: no forward movement reported.
        let moved = pcm.resume_appl_ptr(100).unwrap();
        assert_eq!(moved, 0);
        assert_eq!(pcm.level(), 100);
    }
}
