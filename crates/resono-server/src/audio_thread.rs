//! The audio thread: one loop, one block per ready device per iteration.
//!
//! The loop blocks only on its command channel (standing in for the
//! hardware wakeup) and never holds a lock across a blocking point. Per
//! iteration each device gets at most one block: pull mixed client PCM
//! into the staging buffer, run the device's pipeline on it in place,
//! hand it to the hardware ring. Devices without streams are driven
//! toward free-run instead.
//!
//! Hardware-fatal conditions (severe underrun) are reported to the main
//! thread as a suspend message; the audio thread itself keeps going.

use crate::context::DspContext;
use crate::message::ServerMessage;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use resono_io::{DeviceError, DeviceIo, Direction, PcmHandle};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Provider of mixed client PCM for one output device.
pub trait StreamSource: Send {
    /// Fills `buf` with up to `frames` frames of interleaved PCM.
    /// Returns the number of frames produced; zero means the streams had
    /// nothing this cycle.
    fn fill(&mut self, buf: &mut [u8], frames: usize) -> usize;
}

/// Commands accepted by the audio thread.
pub enum AudioCommand {
    /// Process one block on every ready device.
    Wakeup,
    /// Attach or detach the stream source of a device.
    SetSource {
        /// Device name.
        device: String,
        /// The new source; `None` empties the stream set.
        source: Option<Box<dyn StreamSource>>,
    },
    /// Exit the loop.
    Stop,
}

/// One device owned by the audio thread.
pub struct DeviceEntry<P: PcmHandle> {
    /// Device name, used in control messages.
    pub name: String,
    /// The device state machine.
    pub device: DeviceIo<P>,
    /// The pipeline handoff shared with the main thread.
    pub ctx: Arc<DspContext>,
    /// Mixed-PCM provider; `None` while no streams are attached.
    pub source: Option<Box<dyn StreamSource>>,
    /// Whether this capture node performs hotword detection.
    pub hotword: bool,
    /// True while the device is being driven through no-stream playback.
    in_no_stream: bool,
}

impl<P: PcmHandle> DeviceEntry<P> {
    /// Creates an entry with no streams attached.
    pub fn new(name: &str, device: DeviceIo<P>, ctx: Arc<DspContext>) -> Self {
        Self {
            name: name.to_string(),
            device,
            ctx,
            source: None,
            hotword: false,
            in_no_stream: false,
        }
    }
}

/// The audio loop. Owns the devices; everything else reaches them through
/// commands.
pub struct AudioThread<P: PcmHandle> {
    entries: Vec<DeviceEntry<P>>,
    commands: Receiver<AudioCommand>,
    bus_tx: Sender<ServerMessage>,
    /// Fallback wakeup period while no hardware interrupt model exists.
    tick: Duration,
}

impl<P: PcmHandle + 'static> AudioThread<P> {
    /// Creates the loop over a device set.
    pub fn new(
        entries: Vec<DeviceEntry<P>>,
        commands: Receiver<AudioCommand>,
        bus_tx: Sender<ServerMessage>,
    ) -> Self {
        Self {
            entries,
            commands,
            bus_tx,
            tick: Duration::from_millis(10),
        }
    }

    /// Spawns the loop on its own thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("resono-audio".into())
            .spawn(move || self.run())
    }

    /// Runs until `Stop` or the command channel closes.
    pub fn run(mut self) {
        debug!(devices = self.entries.len(), "audio thread running");
        loop {
            match self.commands.recv_timeout(self.tick) {
                Ok(AudioCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(AudioCommand::SetSource { device, source }) => {
                    if let Some(entry) = self.entries.iter_mut().find(|e| e.name == device) {
                        entry.source = source;
                    }
                }
                Ok(AudioCommand::Wakeup) | Err(RecvTimeoutError::Timeout) => {
                    self.run_iteration();
                }
            }
        }
        debug!("audio thread stopped");
    }

    /// Processes at most one block per device. Public so tests can drive
    /// the loop deterministically.
    pub fn run_iteration(&mut self) {
        for entry in &mut self.entries {
            let result = match entry.device.direction() {
                Direction::Playback => process_playback(entry),
                Direction::Capture => process_capture(entry, &self.bus_tx),
            };
            if let Err(DeviceError::SevereUnderrun) = result {
                // Fatal for this device: let the main thread reopen it.
                let _ = self.bus_tx.send(ServerMessage::SuspendDevice {
                    device: entry.name.clone(),
                });
            } else if let Err(err) = result {
                warn!(device = %entry.name, %err, "device iteration failed");
            }
        }
    }

    /// Access to the device entries (diagnostics and tests).
    pub fn entries(&self) -> &[DeviceEntry<P>] {
        &self.entries
    }

    /// Mutable access to the device entries.
    pub fn entries_mut(&mut self) -> &mut [DeviceEntry<P>] {
        &mut self.entries
    }
}

fn process_playback<P: PcmHandle>(entry: &mut DeviceEntry<P>) -> Result<(), DeviceError> {
    let Some(source) = entry.source.as_mut() else {
        // No streams: keep draining toward (or sitting in) free-run.
        entry.in_no_stream = true;
        return entry.device.no_stream(true);
    };

    if entry.in_no_stream {
        entry.device.no_stream(false)?;
        entry.in_no_stream = false;
    }

    let format = *entry
        .device
        .format()
        .ok_or_else(|| DeviceError::Invalid("device has no format".into()))?;
    let (level, _) = entry.device.frames_queued()?;
    let writable = entry.device.buffer_size().saturating_sub(level);
    let frames = writable.min(entry.device.min_cb_level());
    if frames == 0 {
        return Ok(());
    }

    let frame_bytes = format.frame_bytes();
    let produced = {
        let staging = &mut entry.device.sample_buffer_mut()[..frames * frame_bytes];
        source.fill(staging, frames)
    };
    if produced == 0 {
        return Ok(());
    }

    // One block through the device's pipeline, in place on the staging
    // buffer. A failed block is dropped silently from the pipeline's
    // perspective; the samples still reach the hardware unprocessed.
    let device = &mut entry.device;
    let apply_result = entry.ctx.with_pipeline(|pipeline| {
        let staging = &mut device.sample_buffer_mut()[..produced * frame_bytes];
        pipeline.apply(staging, format.sample_format, produced)
    });
    if let Some(Err(err)) = apply_result {
        warn!(%err, "pipeline block failed; passing samples through");
    }

    let mut remaining = produced;
    while remaining > 0 {
        let (offset, granted) = entry.device.get_buffer(remaining)?;
        if granted == 0 {
            break;
        }
        let chunk = granted.min(remaining);
        entry.device.put_buffer(offset, chunk)?;
        remaining -= chunk;
    }
    Ok(())
}

fn process_capture<P: PcmHandle>(
    entry: &mut DeviceEntry<P>,
    bus_tx: &Sender<ServerMessage>,
) -> Result<(), DeviceError> {
    let (frames, _) = entry.device.frames_queued()?;
    if frames == 0 {
        return Ok(());
    }

    if entry.hotword {
        let _ = bus_tx.send(ServerMessage::HotwordTriggered {
            device: entry.name.clone(),
        });
    }

    // Consume the captured frames; stream delivery is the transport
    // layer's concern.
    let (offset, granted) = entry.device.get_buffer(frames)?;
    entry.device.pcm_mut().mmap_commit(offset, granted)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBus;
    use crossbeam_channel::unbounded;
    use resono_dsp::{AudioFormat, SampleFormat};
    use resono_io::LoopbackPcm;
    use resono_pipeline::PluginRegistry;

    struct Ramp {
        next: i16,
    }

    impl StreamSource for Ramp {
        fn fill(&mut self, buf: &mut [u8], frames: usize) -> usize {
            for frame in 0..frames {
                for ch in 0..2 {
                    let offset = (frame * 2 + ch) * 2;
                    buf[offset..offset + 2].copy_from_slice(&self.next.to_le_bytes());
                }
                self.next = self.next.wrapping_add(1).max(1);
            }
            frames
        }
    }

    fn playback_entry(name: &str) -> DeviceEntry<LoopbackPcm> {
        let mut device = DeviceIo::new(LoopbackPcm::new(), Direction::Playback, 8192, 0, 240);
        device.set_format(AudioFormat::new(48000, 2, SampleFormat::S16Le));
        device.open_dev().unwrap();
        device.configure_dev().unwrap();

        let ctx = Arc::new(DspContext::new(48000, "playback"));
        ctx.load_mock_pipeline(2, &PluginRegistry::new()).unwrap();
        DeviceEntry::new(name, device, ctx)
    }

    fn thread_with(
        entry: DeviceEntry<LoopbackPcm>,
    ) -> (AudioThread<LoopbackPcm>, MessageBus) {
        let bus = MessageBus::new();
        let (_tx, rx) = unbounded();
        (AudioThread::new(vec![entry], rx, bus.sender()), bus)
    }

    #[test]
    fn playback_iteration_moves_samples_to_the_ring() {
        let mut entry = playback_entry("spk");
        entry.source = Some(Box::new(Ramp { next: 1 }));
        let (mut thread, _bus) = thread_with(entry);

        thread.run_iteration();

        let entry = &mut thread.entries_mut()[0];
        let (level, _) = entry.device.frames_queued().unwrap();
        assert_eq!(level, 240);
        assert!(!entry.device.pcm().ring_is_silent());
    }

    #[test]
    fn no_streams_drives_device_into_free_run() {
        let mut entry = playback_entry("spk");
        entry.source = Some(Box::new(Ramp { next: 1 }));
        let (mut thread, _bus) = thread_with(entry);

        // Write one block, then detach the streams.
        thread.run_iteration();
        thread.entries_mut()[0].source = None;

        // Drain: first iteration appends the 50 ms of zeros, then the
        // hardware plays out and the device parks.
        thread.run_iteration();
        assert!(!thread.entries()[0].device.is_free_running());
        let queued = {
            let entry = &mut thread.entries_mut()[0];
            entry.device.frames_queued().unwrap().0
        };
        thread.entries_mut()[0].device.pcm_mut().consume(queued - 10);
        thread.run_iteration();
        assert!(thread.entries()[0].device.is_free_running());

        // A returning stream leaves free-run and resumes mixing.
        thread.entries_mut()[0].source = Some(Box::new(Ramp { next: 5 }));
        thread.run_iteration();
        let entry = &mut thread.entries_mut()[0];
        assert!(!entry.device.is_free_running());
    }

    #[test]
    fn severe_underrun_requests_suspend() {
        let mut entry = playback_entry("spk");
        entry.source = Some(Box::new(Ramp { next: 1 }));
        let (mut thread, mut bus) = thread_with(entry);

        thread.run_iteration();
        // Blow way past the 5-second threshold.
        thread.entries_mut()[0]
            .device
            .pcm_mut()
            .consume(48000 * 6);
        thread.run_iteration();

        let mut suspended = Vec::new();
        {
            use crate::message::MessageKind;
            use std::cell::RefCell;
            use std::rc::Rc;
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            bus.add_handler(MessageKind::SuspendDevice, move |msg| {
                if let ServerMessage::SuspendDevice { device } = msg {
                    sink.borrow_mut().push(device.clone());
                }
            });
            bus.dispatch();
            suspended.extend(seen.borrow().iter().cloned());
        }
        assert_eq!(suspended, ["spk".to_string()]);
    }

    #[test]
    fn hotword_capture_notifies_main_thread() {
        let mut device = DeviceIo::new(LoopbackPcm::new(), Direction::Capture, 4096, 0, 240);
        device.set_format(AudioFormat::new(16000, 1, SampleFormat::S16Le));
        device.open_dev().unwrap();
        device.configure_dev().unwrap();

        let ctx = Arc::new(DspContext::new(16000, "capture"));
        let mut entry = DeviceEntry::new("hotword-mic", device, ctx);
        entry.hotword = true;

        let (mut thread, mut bus) = thread_with(entry);

        // Captured frames appear as available input on the loopback.
        // (For capture, avail == producible space; commit from the
        // hardware side is modeled by leaving appl behind hw.)
        thread.run_iteration();

        use crate::message::MessageKind;
        use std::cell::RefCell;
        use std::rc::Rc;
        let fired = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&fired);
        bus.add_handler(MessageKind::HotwordTriggered, move |_| {
            *sink.borrow_mut() += 1;
        });
        bus.dispatch();
        assert!(*fired.borrow() >= 1);
    }
}
