//! Stereo gain stage.

use crate::PipelineError;
use crate::module::{CellIndex, ControlCells, PluginModule, PortBinding, SlotIndex, SlotPool};
use resono_dsp::decibels_to_linear;
use resono_graph::ExprEnv;

/// Wire layout: ports 0-1 audio in, 2-3 audio out, 4 gain in dB.
const PORT_GAIN: usize = 4;

/// Simple stereo scaler. Mostly useful as the smallest real module for
/// graphs and tests; gain is a control port read at configure time.
#[derive(Default)]
pub struct GainModule {
    audio_in: [Option<SlotIndex>; 2],
    audio_out: [Option<SlotIndex>; 2],
    gain_cell: Option<CellIndex>,
    linear_gain: f32,
}

impl GainModule {
    /// Creates a unity gain stage.
    pub fn new() -> Self {
        Self {
            linear_gain: 1.0,
            ..Self::default()
        }
    }
}

impl PluginModule for GainModule {
    fn instantiate(&mut self, _sample_rate: u32, _env: &ExprEnv) -> Result<(), PipelineError> {
        Ok(())
    }

    fn connect_port(&mut self, port: usize, binding: PortBinding) {
        match (port, binding) {
            (0 | 1, PortBinding::Audio(slot)) => self.audio_in[port] = Some(slot),
            (2 | 3, PortBinding::Audio(slot)) => self.audio_out[port - 2] = Some(slot),
            (PORT_GAIN, PortBinding::Control(cell)) => self.gain_cell = Some(cell),
            _ => {}
        }
    }

    fn configure(&mut self, controls: &ControlCells) {
        let db = self.gain_cell.map_or(0.0, |cell| controls.get(cell));
        self.linear_gain = decibels_to_linear(db);
    }

    fn run(&mut self, pool: &mut SlotPool, frames: usize) {
        for ch in 0..2 {
            let (Some(input), Some(output)) = (self.audio_in[ch], self.audio_out[ch]) else {
                continue;
            };
            if input != output {
                let (src, dst) = pool.pair_mut(input, output);
                for i in 0..frames {
                    dst[i] = src[i] * self.linear_gain;
                }
            } else {
                let buf = pool.slot_mut(output);
                for sample in &mut buf[..frames] {
                    *sample *= self.linear_gain;
                }
            }
        }
    }
}
