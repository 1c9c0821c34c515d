//! Stereo parametric equalizer module (`eq2`).
//!
//! Up to four biquad sections, shared coefficients across both channels
//! with independent filter state. Section parameters arrive through
//! control ports; a section with type 0 is left as passthrough.
//!
//! The offload blob is the fixed 88-byte coefficient image the firmware
//! equalizer consumes: an 8-byte header followed by the four sections'
//! normalized `(b0, b1, b2, a1, a2)`.

use crate::PipelineError;
use crate::module::{CellIndex, ControlCells, PluginModule, PortBinding, SlotIndex, SlotPool};
use resono_dsp::{
    Biquad, high_shelf_coefficients, low_shelf_coefficients, peaking_coefficients,
};
use resono_graph::ExprEnv;

/// Sections per channel.
pub const NUM_SECTIONS: usize = 4;

/// Controls per section: type, frequency, Q, gain.
const CONTROLS_PER_SECTION: usize = 4;

/// First control port; 0-1 audio in, 2-3 audio out precede it.
const PORT_CONTROL_BASE: usize = 4;

/// Component identifier in the offload blob header.
const EQ2_BLOB_ID: u32 = 0x3251_4501; // "EQ2", revision 1

/// Total offload blob size: header + 4 sections × 5 coefficients.
pub const EQ2_BLOB_SIZE: usize = 8 + NUM_SECTIONS * 5 * 4;

/// Section shapes selectable through the type control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    None,
    Peaking,
    LowShelf,
    HighShelf,
}

impl SectionKind {
    fn from_control(value: f32) -> Self {
        match value as i32 {
            1 => SectionKind::Peaking,
            2 => SectionKind::LowShelf,
            3 => SectionKind::HighShelf,
            _ => SectionKind::None,
        }
    }
}

/// Stereo 4-section biquad EQ.
pub struct Eq2Module {
    sample_rate: f32,
    audio_in: [Option<SlotIndex>; 2],
    audio_out: [Option<SlotIndex>; 2],
    controls: [Option<CellIndex>; NUM_SECTIONS * CONTROLS_PER_SECTION],
    /// Per-channel filter state.
    sections: [[Biquad; NUM_SECTIONS]; 2],
    /// Normalized coefficients per section, for the offload blob.
    coefficients: [(f32, f32, f32, f32, f32); NUM_SECTIONS],
    active: [bool; NUM_SECTIONS],
}

impl Eq2Module {
    /// Creates an EQ with all sections passthrough.
    pub fn new() -> Self {
        Self {
            sample_rate: 0.0,
            audio_in: [None; 2],
            audio_out: [None; 2],
            controls: [None; NUM_SECTIONS * CONTROLS_PER_SECTION],
            sections: Default::default(),
            coefficients: [(1.0, 0.0, 0.0, 0.0, 0.0); NUM_SECTIONS],
            active: [false; NUM_SECTIONS],
        }
    }

    fn control(&self, index: usize, controls: &ControlCells, default: f32) -> f32 {
        self.controls[index].map_or(default, |cell| controls.get(cell))
    }
}

impl Default for Eq2Module {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginModule for Eq2Module {
    fn instantiate(&mut self, sample_rate: u32, _env: &ExprEnv) -> Result<(), PipelineError> {
        self.sample_rate = sample_rate as f32;
        self.sections = Default::default();
        Ok(())
    }

    fn connect_port(&mut self, port: usize, binding: PortBinding) {
        match (port, binding) {
            (0 | 1, PortBinding::Audio(slot)) => self.audio_in[port] = Some(slot),
            (2 | 3, PortBinding::Audio(slot)) => self.audio_out[port - 2] = Some(slot),
            (PORT_CONTROL_BASE.., PortBinding::Control(cell)) => {
                let index = port - PORT_CONTROL_BASE;
                if index < self.controls.len() {
                    self.controls[index] = Some(cell);
                }
            }
            _ => {}
        }
    }

    fn configure(&mut self, controls: &ControlCells) {
        for section in 0..NUM_SECTIONS {
            let base = section * CONTROLS_PER_SECTION;
            let kind = SectionKind::from_control(self.control(base, controls, 0.0));
            let freq = self.control(base + 1, controls, 1000.0);
            let q = self.control(base + 2, controls, 0.707);
            let gain_db = self.control(base + 3, controls, 0.0);

            let coeffs = match kind {
                SectionKind::None => None,
                SectionKind::Peaking => {
                    Some(peaking_coefficients(freq, q, gain_db, self.sample_rate))
                }
                SectionKind::LowShelf => {
                    Some(low_shelf_coefficients(freq, gain_db, self.sample_rate))
                }
                SectionKind::HighShelf => {
                    Some(high_shelf_coefficients(freq, gain_db, self.sample_rate))
                }
            };

            match coeffs {
                Some((b0, b1, b2, a0, a1, a2)) => {
                    for channel in &mut self.sections {
                        channel[section].set_coefficients(b0, b1, b2, a0, a1, a2);
                        channel[section].clear();
                    }
                    self.active[section] = true;
                    self.coefficients[section] = self.sections[0][section].coefficients();
                }
                None => {
                    for channel in &mut self.sections {
                        channel[section] = Biquad::new();
                    }
                    self.active[section] = false;
                    self.coefficients[section] = (1.0, 0.0, 0.0, 0.0, 0.0);
                }
            }
        }
    }

    fn get_offload_blob(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serialize_blob(&self.coefficients))
    }

    fn run(&mut self, pool: &mut SlotPool, frames: usize) {
        for ch in 0..2 {
            let (Some(input), Some(output)) = (self.audio_in[ch], self.audio_out[ch]) else {
                continue;
            };
            if input != output {
                let (src, dst) = pool.pair_mut(input, output);
                dst[..frames].copy_from_slice(&src[..frames]);
            }
            let buf = pool.slot_mut(output);
            for (section, biquad) in self.sections[ch].iter_mut().enumerate() {
                if self.active[section] {
                    biquad.process_block_inplace(&mut buf[..frames]);
                }
            }
        }
    }

    fn deinstantiate(&mut self) {
        self.sections = Default::default();
    }
}

fn serialize_blob(coefficients: &[(f32, f32, f32, f32, f32); NUM_SECTIONS]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(EQ2_BLOB_SIZE);
    blob.extend_from_slice(&EQ2_BLOB_ID.to_le_bytes());
    blob.extend_from_slice(&((EQ2_BLOB_SIZE - 8) as u32).to_le_bytes());
    for &(b0, b1, b2, a1, a2) in coefficients {
        for value in [b0, b1, b2, a1, a2] {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }
    blob
}

/// The canonical bypass image: every section passthrough. Written to the
/// firmware EQ when offload is withdrawn.
pub fn eq2_bypass_blob() -> Vec<u8> {
    serialize_blob(&[(1.0, 0.0, 0.0, 0.0, 0.0); NUM_SECTIONS])
}
