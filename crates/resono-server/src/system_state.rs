//! Shared system state snapshot.
//!
//! The scalar knobs the rest of the system reads: volume, mute, feature
//! flags, display rotation, channel limits, and the offload map string.
//! Owned by the main thread; other threads read through the shared lock.

use std::sync::{Arc, Mutex};

/// Scalar server-wide state.
#[derive(Debug, Clone)]
pub struct SystemState {
    /// Output volume in steps, 0..=100.
    pub volume: u32,
    /// Output mute.
    pub mute: bool,
    /// Capture gain in dB.
    pub capture_gain_db: f32,
    /// Whether DSP offload is allowed at all.
    pub dsp_offload_enabled: bool,
    /// Whether the platform supports noise cancellation.
    pub noise_cancellation_supported: bool,
    /// Display rotation in quarter turns (0..=3).
    pub display_rotation: i64,
    /// Largest channel count the internal speaker path supports.
    pub max_internal_speaker_channels: usize,
    /// Largest channel count the headphone path supports.
    pub max_headphone_channels: usize,
    /// Offload map configuration string.
    pub dsp_offload_map_str: String,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            volume: 100,
            mute: false,
            capture_gain_db: 0.0,
            dsp_offload_enabled: false,
            noise_cancellation_supported: false,
            display_rotation: 0,
            max_internal_speaker_channels: 2,
            max_headphone_channels: 2,
            dsp_offload_map_str: String::new(),
        }
    }
}

/// Handle shared across threads.
pub type SharedSystemState = Arc<Mutex<SystemState>>;

/// Creates a shared state with defaults.
pub fn shared_system_state() -> SharedSystemState {
    Arc::new(Mutex::new(SystemState::default()))
}
