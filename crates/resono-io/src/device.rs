//! Per-device state machine around a [`PcmHandle`].
//!
//! Output devices never stop the hardware clock while idle. When the last
//! client stream goes away the device drains its remaining valid samples
//! under zero fill, then parks in the *free-run* state: the whole ring is
//! silence and the hardware reads it indefinitely with no application
//! involvement. When a stream returns, the application pointer is planted
//! a safe distance ahead of the hardware pointer and normal mixing
//! resumes. Zero fills always precede pointer moves, so the transition is
//! inaudible.

use crate::DeviceError;
use crate::pcm::{PcmError, PcmHandle};
use resono_dsp::AudioFormat;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Transfer direction of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device consumes samples (speaker, headphone).
    Playback,
    /// Device produces samples (microphone).
    Capture,
}

/// Zero-fill increment while draining without streams: 50 ms of audio.
const NO_STREAM_FILL_ZEROS_MS: usize = 50;

/// Severe-underrun threshold in seconds of audio.
const SEVERE_UNDERRUN_SECS: usize = 5;

/// Hardware dBFS sink for volume application.
pub trait VolumeMixer {
    /// Sets the hardware attenuation in dBFS (0.0 = unity).
    fn set_dbfs(&mut self, dbfs: f32);
}

/// Inter-arrival rate estimator stub.
///
/// The estimation algorithm itself lives with the scheduling periphery;
/// the device layer only needs to invalidate it whenever pointer jumps
/// break the inter-arrival spacing (resume, leaving free-run).
#[derive(Debug, Default, Clone, Copy)]
pub struct RateEstimator {
    epoch: u32,
}

impl RateEstimator {
    /// Discards accumulated timing state.
    pub fn reset(&mut self) {
        self.epoch += 1;
    }

    /// How many times the estimator has been reset.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

/// One sound device: an opened PCM handle plus the state the server keeps
/// at the hardware boundary.
pub struct DeviceIo<P: PcmHandle> {
    pcm: P,
    direction: Direction,
    format: Option<AudioFormat>,
    /// Ring capacity in frames.
    buffer_size: usize,
    /// Level at or below which the device is considered underrun.
    min_buffer_level: usize,
    /// Smallest fill a client callback produces.
    min_cb_level: usize,

    free_running: bool,
    filled_zeros_for_draining: usize,
    severe_underrun_frames: usize,

    num_underruns: u32,
    num_severe_underruns: u32,
    /// Frames of audible glitch accumulated by underrun recoveries.
    underrun_glitch_frames: u64,

    /// CPU-side staging buffer, `buffer_size × frame_bytes` bytes.
    sample_buffer: Vec<u8>,
    hwparams_set: bool,
    is_open: bool,
    rate_estimator: RateEstimator,
}

impl<P: PcmHandle> DeviceIo<P> {
    /// Wraps a PCM handle. Levels are in frames; `buffer_size` is the
    /// ring capacity requested at configure time.
    pub fn new(
        pcm: P,
        direction: Direction,
        buffer_size: usize,
        min_buffer_level: usize,
        min_cb_level: usize,
    ) -> Self {
        Self {
            pcm,
            direction,
            format: None,
            buffer_size,
            min_buffer_level,
            min_cb_level,
            free_running: false,
            filled_zeros_for_draining: 0,
            severe_underrun_frames: 0,
            num_underruns: 0,
            num_severe_underruns: 0,
            underrun_glitch_frames: 0,
            sample_buffer: Vec::new(),
            hwparams_set: false,
            is_open: false,
            rate_estimator: RateEstimator::default(),
        }
    }

    /// Sets the stream format. Must happen before
    /// [`configure_dev`](Self::configure_dev).
    pub fn set_format(&mut self, format: AudioFormat) {
        self.format = Some(format);
    }

    /// The configured format, if any.
    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The underlying PCM handle.
    pub fn pcm(&self) -> &P {
        &self.pcm
    }

    /// Mutable access to the underlying PCM handle.
    pub fn pcm_mut(&mut self) -> &mut P {
        &mut self.pcm
    }

    /// Ring capacity in frames.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The configured minimum hardware level.
    pub fn min_buffer_level(&self) -> usize {
        self.min_buffer_level
    }

    /// The configured minimum callback fill.
    pub fn min_cb_level(&self) -> usize {
        self.min_cb_level
    }

    /// Marks the device open and resets the boundary state. Idempotent.
    pub fn open_dev(&mut self) -> Result<(), DeviceError> {
        if self.is_open {
            return Ok(());
        }
        self.is_open = true;
        self.free_running = false;
        self.filled_zeros_for_draining = 0;
        self.hwparams_set = false;
        Ok(())
    }

    /// Applies hardware and software parameters and allocates the staging
    /// buffer. Capture devices start immediately; playback devices wait
    /// for samples.
    pub fn configure_dev(&mut self) -> Result<(), DeviceError> {
        let format = self
            .format
            .ok_or_else(|| DeviceError::Invalid("configure_dev without format".into()))?;
        if !self.is_open {
            return Err(DeviceError::Invalid("configure_dev on closed device".into()));
        }

        if !self.hwparams_set {
            self.pcm
                .set_hwparams(&format, self.buffer_size, false, None)?;
            self.hwparams_set = true;
        }

        self.sample_buffer = vec![0; self.buffer_size * format.frame_bytes()];
        self.severe_underrun_frames = SEVERE_UNDERRUN_SECS * format.frame_rate as usize;

        let map = self.pcm.get_channel_map()?;
        self.pcm.set_channel_map(&map)?;
        self.pcm.set_swparams()?;

        if self.direction == Direction::Capture {
            self.pcm.start()?;
        }
        debug!(buffer_size = self.buffer_size, "device configured");
        Ok(())
    }

    /// Releases the staging buffer and marks the device closed.
    pub fn close_dev(&mut self) {
        self.sample_buffer = Vec::new();
        self.is_open = false;
    }

    /// True between `open_dev` and `close_dev`.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Frames the hardware still has queued (output) or has captured
    /// (input), plus a monotonic timestamp. Severe underruns are counted
    /// and surfaced as [`DeviceError::SevereUnderrun`].
    pub fn frames_queued(&mut self) -> Result<(usize, Instant), DeviceError> {
        let (avail, tstamp) = match self
            .pcm
            .avail_frames(self.buffer_size, self.severe_underrun_frames)
        {
            Ok(result) => result,
            Err(PcmError::SevereUnderrun) => {
                self.num_severe_underruns += 1;
                warn!("severe underrun");
                return Err(DeviceError::SevereUnderrun);
            }
            Err(err) => return Err(err.into()),
        };
        let frames = match self.direction {
            Direction::Playback => self.buffer_size.saturating_sub(avail),
            Direction::Capture => avail,
        };
        Ok((frames, tstamp))
    }

    /// Valid (non-silence) frames remaining in the ring: the hardware
    /// level minus the zeros filled for draining. Zero while free-running.
    pub fn valid_frames(&mut self) -> Result<usize, DeviceError> {
        if self.free_running {
            return Ok(0);
        }
        let (level, _) = self.frames_queued()?;
        Ok(level.saturating_sub(self.filled_zeros_for_draining))
    }

    /// Begins an mmap transfer of up to `frames` frames, clipped to the
    /// ring capacity. Returns `(ring offset, granted frames)`.
    pub fn get_buffer(&mut self, frames: usize) -> Result<(usize, usize), DeviceError> {
        let granted = self.pcm.mmap_begin(frames.min(self.buffer_size))?;
        Ok(granted)
    }

    /// Copies `frames` staged frames into the ring at `offset` and
    /// commits them. The staging tail beyond `frames` moves to the front
    /// for the next cycle.
    pub fn put_buffer(&mut self, offset: usize, frames: usize) -> Result<(), DeviceError> {
        let frame_bytes = self.pcm.frame_bytes();
        let byte_len = frames * frame_bytes;
        let staged = self.sample_buffer.len();
        if byte_len > staged {
            return Err(DeviceError::Invalid(format!(
                "putting {frames} frames but staging holds {}",
                staged / frame_bytes.max(1)
            )));
        }
        let ring = self.pcm.ring_bytes();
        let ring_offset = offset * frame_bytes;
        ring[ring_offset..ring_offset + byte_len].copy_from_slice(&self.sample_buffer[..byte_len]);
        self.sample_buffer.copy_within(byte_len.., 0);
        self.pcm.mmap_commit(offset, frames)?;
        Ok(())
    }

    /// The CPU-side staging buffer client mixes land in.
    pub fn sample_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.sample_buffer
    }

    /// Whether the device is parked in free-run.
    pub fn is_free_running(&self) -> bool {
        self.free_running
    }

    /// Zeros filled so far while draining toward free-run.
    pub fn filled_zeros_for_draining(&self) -> usize {
        self.filled_zeros_for_draining
    }

    /// Underruns recovered since open.
    pub fn num_underruns(&self) -> u32 {
        self.num_underruns
    }

    /// Severe underruns observed since open.
    pub fn num_severe_underruns(&self) -> u32 {
        self.num_severe_underruns
    }

    /// Total frames of glitch reported by underrun recoveries.
    pub fn underrun_glitch_frames(&self) -> u64 {
        self.underrun_glitch_frames
    }

    /// Resets accumulated by the rate estimator (diagnostic).
    pub fn rate_estimator_epoch(&self) -> u32 {
        self.rate_estimator.epoch()
    }

    /// Drives the no-stream state machine: `enable` drains toward
    /// free-run, `!enable` leaves it and replants the application pointer.
    pub fn no_stream(&mut self, enable: bool) -> Result<(), DeviceError> {
        if enable {
            self.possibly_enter_free_run()
        } else {
            self.leave_free_run()
        }
    }

    /// Underrun recovery: silence the whole ring, then plant the
    /// application pointer `min_buffer_level + 1.5 × min_cb_level` ahead
    /// of the hardware pointer. An actual pointer advance is an audible
    /// glitch of that many frames.
    pub fn output_underrun(&mut self) -> Result<usize, DeviceError> {
        let filled = self.fill_whole_buffer_with_zeros()?;

        let ahead = self.min_buffer_level + self.min_cb_level + self.min_cb_level / 2;
        let displaced = self.pcm.resume_appl_ptr(ahead)?;
        if displaced > 0 {
            self.underrun_glitch_frames += displaced as u64;
        }
        self.num_underruns += 1;
        info!(displaced, "output underrun recovered");
        Ok(filled)
    }

    /// Applies output volume. Nodes that need software volume force the
    /// hardware to unity and rely on pipeline-side scaling.
    pub fn apply_volume(
        &mut self,
        mixer: &mut dyn VolumeMixer,
        system_volume: u32,
        node_offset_db: f32,
        software_volume_needed: bool,
    ) {
        if !self.is_open {
            return;
        }
        if software_volume_needed {
            mixer.set_dbfs(0.0);
            return;
        }
        let dbfs = volume_curve_db(system_volume) + node_offset_db;
        mixer.set_dbfs(dbfs);
    }

    /// Resume after suspend: bring the PCM back and invalidate timing.
    pub fn attempt_resume(&mut self) -> Result<(), DeviceError> {
        self.pcm.attempt_resume()?;
        self.rate_estimator.reset();
        Ok(())
    }

    // --- free-run internals ---

    fn possibly_enter_free_run(&mut self) -> Result<(), DeviceError> {
        if self.free_running {
            return Ok(());
        }

        // Real hardware level, not adjusted by min_buffer_level.
        let (real_hw_level, _) = self.frames_queued()?;

        // Underrun: recover, then park.
        if real_hw_level <= self.min_buffer_level {
            self.output_underrun()?;
            self.free_running = true;
            return Ok(());
        }

        // Every valid sample has drained: silence the ring and park.
        if real_hw_level <= self.filled_zeros_for_draining || real_hw_level == 0 {
            self.fill_whole_buffer_with_zeros()?;
            self.free_running = true;
            debug!("entered free-run");
            return Ok(());
        }

        // Still draining: top up with zeros, bounded by the ring space.
        let rate = self
            .format
            .map(|f| f.frame_rate as usize)
            .ok_or_else(|| DeviceError::Invalid("no_stream without format".into()))?;
        let fill = (NO_STREAM_FILL_ZEROS_MS * rate / 1000).min(self.buffer_size - real_hw_level);
        self.fill_zeros(fill)?;
        self.filled_zeros_for_draining += fill;
        Ok(())
    }

    fn leave_free_run(&mut self) -> Result<(), DeviceError> {
        // Free-run intervals must not contaminate rate estimation.
        self.rate_estimator.reset();

        if self.free_running {
            self.adjust_appl_ptr_for_leaving_free_run()?;
        } else {
            self.adjust_appl_ptr_samples_remaining()?;
        }
        self.free_running = false;
        self.filled_zeros_for_draining = 0;
        debug!("left free-run");
        Ok(())
    }

    /// Plant the application pointer `min_buffer_level + min_cb_level`
    /// ahead of the hardware pointer when resuming from free-run.
    fn adjust_appl_ptr_for_leaving_free_run(&mut self) -> Result<(), DeviceError> {
        let ahead = self.min_buffer_level + self.min_cb_level;
        self.pcm.resume_appl_ptr(ahead)?;
        Ok(())
    }

    /// Leaving the no-stream state before free-run was reached: the ring
    /// may still hold valid samples. The pointer lands at
    /// `max(min_buffer_level + min_cb_level, valid)`, with the deficit
    /// zero-filled first so nothing stale plays.
    fn adjust_appl_ptr_samples_remaining(&mut self) -> Result<(), DeviceError> {
        let (real_hw_level, _) = self.frames_queued()?;

        // An underrun recovery already repositions the pointer.
        if real_hw_level <= self.min_buffer_level {
            self.output_underrun()?;
            return Ok(());
        }

        let valid = real_hw_level.saturating_sub(self.filled_zeros_for_draining);
        let offset = (self.min_buffer_level + self.min_cb_level).max(valid);

        if offset > real_hw_level {
            self.fill_zeros(offset - real_hw_level)?;
        }
        self.pcm.resume_appl_ptr(offset)?;
        Ok(())
    }

    /// Zeroes the whole ring without moving pointers, so whatever the
    /// hardware reads next is silence.
    fn fill_whole_buffer_with_zeros(&mut self) -> Result<usize, DeviceError> {
        self.pcm.ring_bytes().fill(0);
        Ok(self.buffer_size)
    }

    /// Writes `frames` zero frames at the application pointer.
    fn fill_zeros(&mut self, frames: usize) -> Result<(), DeviceError> {
        let frame_bytes = self.pcm.frame_bytes();
        let mut remaining = frames;
        while remaining > 0 {
            let (offset, granted) = self.pcm.mmap_begin(remaining)?;
            if granted == 0 {
                return Err(DeviceError::Invalid(
                    "no ring space while filling zeros".into(),
                ));
            }
            let byte_offset = offset * frame_bytes;
            let byte_len = granted * frame_bytes;
            self.pcm.ring_bytes()[byte_offset..byte_offset + byte_len].fill(0);
            self.pcm.mmap_commit(offset, granted)?;
            remaining -= granted;
        }
        Ok(())
    }
}

/// Default volume curve: 0.5 dB of attenuation per volume step below 100.
fn volume_curve_db(system_volume: u32) -> f32 {
    let volume = system_volume.min(100);
    (volume as f32 - 100.0) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackPcm;
    use resono_dsp::SampleFormat;

    fn device(
        buffer_size: usize,
        min_buffer_level: usize,
        min_cb_level: usize,
    ) -> DeviceIo<LoopbackPcm> {
        let mut dev = DeviceIo::new(
            LoopbackPcm::new(),
            Direction::Playback,
            buffer_size,
            min_buffer_level,
            min_cb_level,
        );
        dev.set_format(AudioFormat::new(48000, 2, SampleFormat::S16Le));
        dev.open_dev().unwrap();
        dev.configure_dev().unwrap();
        dev
    }

    /// Writes `frames` of nonzero samples through the mmap path.
    fn write_tone(dev: &mut DeviceIo<LoopbackPcm>, frames: usize) {
        let mut remaining = frames;
        while remaining > 0 {
            let (offset, granted) = dev.get_buffer(remaining).unwrap();
            assert!(granted > 0);
            let frame_bytes = dev.pcm().frame_bytes();
            let start = offset * frame_bytes;
            for b in dev.pcm_mut().ring_bytes()[start..start + granted * frame_bytes].iter_mut() {
                *b = 0x55;
            }
            dev.pcm_mut().mmap_commit(offset, granted).unwrap();
            remaining -= granted;
        }
    }

    #[test]
    fn open_is_idempotent() {
        let mut dev = device(8192, 0, 240);
        assert!(dev.is_open());
        dev.open_dev().unwrap();
        assert!(dev.is_open());
    }

    #[test]
    fn capture_devices_start_at_configure() {
        let mut dev = DeviceIo::new(LoopbackPcm::new(), Direction::Capture, 4096, 0, 240);
        dev.set_format(AudioFormat::new(48000, 1, SampleFormat::S16Le));
        dev.open_dev().unwrap();
        dev.configure_dev().unwrap();
        assert_eq!(dev.pcm().state(), crate::pcm::PcmState::Running);
    }

    #[test]
    fn frames_queued_reports_output_level() {
        let mut dev = device(8192, 0, 240);
        write_tone(&mut dev, 500);
        let (queued, _) = dev.frames_queued().unwrap();
        assert_eq!(queued, 500);
    }

    #[test]
    fn draining_fills_50ms_of_zeros_then_parks() {
        let mut dev = device(8192, 0, 240);

        // 200 valid frames queued; no streams any more.
        write_tone(&mut dev, 200);
        dev.no_stream(true).unwrap();
        // 50 ms at 48 kHz = 2400 zero frames appended; not yet free-running.
        assert!(!dev.is_free_running());
        assert_eq!(dev.filled_zeros_for_draining(), 2400);
        let (queued, _) = dev.frames_queued().unwrap();
        assert_eq!(queued, 2600);

        // Hardware consumed down to 40 frames: everything valid drained.
        dev.pcm_mut().consume(2560);
        dev.no_stream(true).unwrap();
        assert!(dev.is_free_running());
        assert!(dev.pcm().ring_is_silent());

        // Leaving free-run replants the pointer min_buffer + min_cb ahead.
        dev.no_stream(false).unwrap();
        assert!(!dev.is_free_running());
        assert_eq!(dev.filled_zeros_for_draining(), 0);
        let (queued, _) = dev.frames_queued().unwrap();
        assert_eq!(queued, 240);
    }

    #[test]
    fn free_run_entry_is_idempotent() {
        let mut dev = device(8192, 0, 240);
        write_tone(&mut dev, 10);
        dev.pcm_mut().consume(10);
        dev.no_stream(true).unwrap();
        assert!(dev.is_free_running());
        let underruns = dev.num_underruns();
        dev.no_stream(true).unwrap();
        assert_eq!(dev.num_underruns(), underruns);
    }

    #[test]
    fn valid_frames_excludes_draining_zeros() {
        let mut dev = device(8192, 0, 240);
        write_tone(&mut dev, 300);
        dev.no_stream(true).unwrap();
        assert_eq!(dev.valid_frames().unwrap(), 300);
        dev.pcm_mut().consume(200);
        assert_eq!(dev.valid_frames().unwrap(), 100);
    }

    #[test]
    fn leaving_no_stream_with_valid_samples_keeps_them() {
        let mut dev = device(8192, 0, 240);
        // 1000 valid frames, then one drain round adds 2400 zeros.
        write_tone(&mut dev, 1000);
        dev.no_stream(true).unwrap();
        assert_eq!(dev.filled_zeros_for_draining(), 2400);

        // Streams return while 3000 frames are still queued (600 valid).
        dev.pcm_mut().consume(400);
        dev.no_stream(false).unwrap();
        // valid = 3000 - 2400 = 600 > 240, so the pointer lands at 600.
        let (queued, _) = dev.frames_queued().unwrap();
        assert_eq!(queued, 600);
        assert_eq!(dev.filled_zeros_for_draining(), 0);
    }

    #[test]
    fn underrun_zeroes_ring_and_advances_pointer() {
        let mut dev = device(8192, 0, 240);
        write_tone(&mut dev, 100);
        dev.pcm_mut().consume(100);

        // Level 0 ≤ min_buffer_level: entering no-stream recovers the
        // underrun and parks in free-run.
        dev.no_stream(true).unwrap();
        assert!(dev.is_free_running());
        assert_eq!(dev.num_underruns(), 1);
        assert!(dev.pcm().ring_is_silent());
        // appl_ptr sits min_buffer + 1.5·min_cb ahead of hw_ptr.
        let (queued, _) = dev.frames_queued().unwrap();
        assert_eq!(queued, 360);
        assert_eq!(dev.underrun_glitch_frames(), 360);
    }

    #[test]
    fn severe_underrun_is_counted() {
        let mut dev = device(8192, 0, 240);
        write_tone(&mut dev, 100);
        // Severe threshold is 5 s × 48000; push hw far past appl.
        dev.pcm_mut().consume(100 + 48000 * 5 + 1);
        assert!(matches!(
            dev.frames_queued(),
            Err(DeviceError::SevereUnderrun)
        ));
        assert_eq!(dev.num_severe_underruns(), 1);
    }

    #[test]
    fn leave_free_run_resets_rate_estimator() {
        let mut dev = device(8192, 0, 240);
        write_tone(&mut dev, 10);
        let before = dev.rate_estimator_epoch();
        dev.no_stream(false).unwrap();
        assert_eq!(dev.rate_estimator_epoch(), before + 1);
    }

    #[test]
    fn resume_resets_rate_estimator() {
        let mut dev = device(8192, 0, 240);
        let before = dev.rate_estimator_epoch();
        dev.attempt_resume().unwrap();
        assert_eq!(dev.rate_estimator_epoch(), before + 1);
    }

    #[test]
    fn volume_applies_curve_or_unity() {
        struct Recorded(f32);
        impl VolumeMixer for Recorded {
            fn set_dbfs(&mut self, dbfs: f32) {
                self.0 = dbfs;
            }
        }
        let mut dev = device(8192, 0, 240);
        let mut mixer = Recorded(f32::NAN);

        dev.apply_volume(&mut mixer, 100, 0.0, false);
        assert_eq!(mixer.0, 0.0);
        dev.apply_volume(&mut mixer, 80, 1.5, false);
        assert_eq!(mixer.0, -8.5);
        dev.apply_volume(&mut mixer, 20, 0.0, true);
        assert_eq!(mixer.0, 0.0);
    }

    #[test]
    fn put_buffer_moves_staging_tail_forward() {
        let mut dev = device(1024, 0, 240);
        let frame_bytes = 4;
        // Stage two frames of 0xAA then two of 0xBB.
        for b in dev.sample_buffer_mut()[..2 * frame_bytes].iter_mut() {
            *b = 0xAA;
        }
        for b in dev.sample_buffer_mut()[2 * frame_bytes..4 * frame_bytes].iter_mut() {
            *b = 0xBB;
        }
        let (offset, granted) = dev.get_buffer(2).unwrap();
        assert_eq!(granted, 2);
        dev.put_buffer(offset, 2).unwrap();
        // The 0xBB tail moved to the front of the staging buffer.
        assert_eq!(dev.sample_buffer_mut()[0], 0xBB);
        // And the ring carries the 0xAA frames.
        assert_eq!(dev.pcm_mut().ring_bytes()[0], 0xAA);
    }
}
