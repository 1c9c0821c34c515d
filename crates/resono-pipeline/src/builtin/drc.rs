//! Stereo dynamic-range compressor module.
//!
//! Thin pipeline wrapper around [`DrcKernel`]: control ports select the
//! kernel parameters, audio ports carry the stereo pair. The offload blob
//! serializes the active parameter set for the firmware-side compressor.

use crate::PipelineError;
use crate::module::{CellIndex, ControlCells, PluginModule, PortBinding, SlotIndex, SlotPool};
use resono_dsp::{DrcKernel, DrcParams};
use resono_graph::ExprEnv;

/// Wire layout: 0-1 audio in, 2-3 audio out, then the controls below.
const PORT_ENABLE: usize = 4;
const PORT_THRESHOLD: usize = 5;
const PORT_KNEE: usize = 6;
const PORT_RATIO: usize = 7;
const PORT_ATTACK: usize = 8;
const PORT_RELEASE: usize = 9;
const PORT_PRE_DELAY: usize = 10;
const PORT_POST_GAIN: usize = 11;
const PORT_ZONE_BASE: usize = 12;
const NUM_CONTROLS: usize = 12;

/// Component identifier in the offload blob header.
const DRC_BLOB_ID: u32 = 0x4352_4401; // "DRC", revision 1

/// Stereo single-band DRC pipeline module.
pub struct DrcModule {
    kernel: Option<DrcKernel>,
    audio_in: [Option<SlotIndex>; 2],
    audio_out: [Option<SlotIndex>; 2],
    controls: [Option<CellIndex>; NUM_CONTROLS],
    params: DrcParams,
    enabled: bool,
}

impl DrcModule {
    /// Creates an unconfigured DRC module.
    pub fn new() -> Self {
        Self {
            kernel: None,
            audio_in: [None; 2],
            audio_out: [None; 2],
            controls: [None; NUM_CONTROLS],
            params: DrcParams::default(),
            enabled: true,
        }
    }

    fn control(&self, port: usize, controls: &ControlCells, default: f32) -> f32 {
        self.controls[port - PORT_ENABLE]
            .map_or(default, |cell| controls.get(cell))
    }
}

impl Default for DrcModule {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginModule for DrcModule {
    fn instantiate(&mut self, sample_rate: u32, _env: &ExprEnv) -> Result<(), PipelineError> {
        self.kernel = Some(DrcKernel::new(sample_rate as f32));
        Ok(())
    }

    fn connect_port(&mut self, port: usize, binding: PortBinding) {
        match (port, binding) {
            (0 | 1, PortBinding::Audio(slot)) => self.audio_in[port] = Some(slot),
            (2 | 3, PortBinding::Audio(slot)) => self.audio_out[port - 2] = Some(slot),
            (PORT_ENABLE..=15, PortBinding::Control(cell)) => {
                self.controls[port - PORT_ENABLE] = Some(cell);
            }
            _ => {}
        }
    }

    fn configure(&mut self, controls: &ControlCells) {
        let defaults = DrcParams::default();
        self.enabled = self.control(PORT_ENABLE, controls, 1.0) != 0.0;
        self.params = DrcParams {
            db_threshold: self.control(PORT_THRESHOLD, controls, defaults.db_threshold),
            db_knee: self.control(PORT_KNEE, controls, defaults.db_knee),
            ratio: self.control(PORT_RATIO, controls, defaults.ratio),
            attack_time: self.control(PORT_ATTACK, controls, defaults.attack_time),
            release_time: self.control(PORT_RELEASE, controls, defaults.release_time),
            pre_delay_time: self.control(PORT_PRE_DELAY, controls, defaults.pre_delay_time),
            db_post_gain: self.control(PORT_POST_GAIN, controls, defaults.db_post_gain),
            release_zones: [
                self.control(PORT_ZONE_BASE, controls, defaults.release_zones[0]),
                self.control(PORT_ZONE_BASE + 1, controls, defaults.release_zones[1]),
                self.control(PORT_ZONE_BASE + 2, controls, defaults.release_zones[2]),
                self.control(PORT_ZONE_BASE + 3, controls, defaults.release_zones[3]),
            ],
        };
        if let Some(kernel) = self.kernel.as_mut() {
            kernel.set_parameters(&self.params);
            kernel.set_enabled(self.enabled);
        }
    }

    fn get_offload_blob(&self) -> Result<Vec<u8>, PipelineError> {
        // Header: component id + payload size, then the parameter set the
        // firmware compressor mirrors.
        let payload: Vec<f32> = vec![
            if self.enabled { 1.0 } else { 0.0 },
            self.params.db_threshold,
            self.params.db_knee,
            self.params.ratio,
            self.params.attack_time,
            self.params.release_time,
            self.params.pre_delay_time,
            self.params.db_post_gain,
            self.params.release_zones[0],
            self.params.release_zones[1],
            self.params.release_zones[2],
            self.params.release_zones[3],
        ];
        let mut blob = Vec::with_capacity(8 + payload.len() * 4);
        blob.extend_from_slice(&DRC_BLOB_ID.to_le_bytes());
        blob.extend_from_slice(&((payload.len() * 4) as u32).to_le_bytes());
        for value in payload {
            blob.extend_from_slice(&value.to_le_bytes());
        }
        Ok(blob)
    }

    fn get_delay(&self) -> u32 {
        self.kernel
            .as_ref()
            .map_or(0, |kernel| kernel.delay_frames() as u32)
    }

    fn run(&mut self, pool: &mut SlotPool, frames: usize) {
        let Some(kernel) = self.kernel.as_mut() else {
            return;
        };
        let (Some(in_l), Some(in_r), Some(out_l), Some(out_r)) = (
            self.audio_in[0],
            self.audio_in[1],
            self.audio_out[0],
            self.audio_out[1],
        ) else {
            return;
        };

        // The kernel works in place; stage inputs into the output slots
        // first when the allocator gave us distinct buffers.
        for (src, dst) in [(in_l, out_l), (in_r, out_r)] {
            if src != dst {
                let (src, dst) = pool.pair_mut(src, dst);
                dst[..frames].copy_from_slice(&src[..frames]);
            }
        }

        let (left, right) = pool.pair_mut(out_l, out_r);
        kernel.process(&mut left[..frames], &mut right[..frames]);
    }

    fn deinstantiate(&mut self) {
        self.kernel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_module(cells: &mut ControlCells, enable: f32) -> DrcModule {
        let mut module = DrcModule::new();
        module.connect_port(0, PortBinding::Audio(SlotIndex(0)));
        module.connect_port(1, PortBinding::Audio(SlotIndex(1)));
        module.connect_port(2, PortBinding::Audio(SlotIndex(0)));
        module.connect_port(3, PortBinding::Audio(SlotIndex(1)));
        let enable_cell = cells.push(enable);
        module.connect_port(PORT_ENABLE, PortBinding::Control(enable_cell));
        let pre_delay = cells.push(0.006);
        module.connect_port(PORT_PRE_DELAY, PortBinding::Control(pre_delay));
        module
    }

    #[test]
    fn reports_pre_delay_as_module_delay() {
        let mut cells = ControlCells::default();
        let mut module = connected_module(&mut cells, 1.0);
        module
            .instantiate(48000, &ExprEnv::new())
            .unwrap();
        module.configure(&cells);
        // 6 ms at 48 kHz = 288 frames.
        assert_eq!(module.get_delay(), 288);
    }

    #[test]
    fn disabled_module_is_delay_only() {
        let mut cells = ControlCells::default();
        let mut module = connected_module(&mut cells, 0.0);
        module.instantiate(48000, &ExprEnv::new()).unwrap();
        module.configure(&cells);
        let delay = module.get_delay() as usize;

        let mut pool = SlotPool::new(2);
        pool.slot_mut(SlotIndex(0))[0] = 1.0;
        module.run(&mut pool, resono_dsp::BLOCK_MAX);
        // The impulse reappears `delay` frames later, unscaled.
        assert_eq!(pool.slot(SlotIndex(0))[delay], 1.0);
    }

    #[test]
    fn offload_blob_carries_parameters() {
        let mut cells = ControlCells::default();
        let mut module = connected_module(&mut cells, 1.0);
        module.instantiate(48000, &ExprEnv::new()).unwrap();
        module.configure(&cells);

        let blob = module.get_offload_blob().unwrap();
        assert_eq!(blob.len(), 8 + 12 * 4);
        let id = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
        assert_eq!(id, DRC_BLOB_ID);
        let size = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
        assert_eq!(size as usize, blob.len() - 8);
        // First payload float is the enable flag.
        let enabled = f32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]);
        assert_eq!(enabled, 1.0);
    }

    #[test]
    fn instantiate_is_idempotent_across_deinstantiate() {
        let mut cells = ControlCells::default();
        let mut module = connected_module(&mut cells, 1.0);
        module.instantiate(48000, &ExprEnv::new()).unwrap();
        module.deinstantiate();
        module.instantiate(44100, &ExprEnv::new()).unwrap();
        module.configure(&cells);
        // 6 ms at 44.1 kHz = 264.6 frames, masked down to 256.
        assert_eq!(module.get_delay(), 256);
    }
}
