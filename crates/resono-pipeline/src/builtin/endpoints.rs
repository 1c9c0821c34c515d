//! The `source` and `sink` endpoint modules.

use crate::PipelineError;
use crate::module::{
    ControlCells, ExtDspModule, MAX_EXT_DSP_PORTS, PluginModule, PortBinding, SlotIndex, SlotPool,
};
use resono_graph::ExprEnv;
use tracing::warn;

/// Pipeline inlet: audio outputs only, no processing. The device writes
/// deinterleaved samples straight into its output slots.
#[derive(Default)]
pub struct SourceModule {
    outputs: Vec<SlotIndex>,
}

impl SourceModule {
    /// Creates a source endpoint.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PluginModule for SourceModule {
    fn instantiate(&mut self, _sample_rate: u32, _env: &ExprEnv) -> Result<(), PipelineError> {
        Ok(())
    }

    fn connect_port(&mut self, _port: usize, binding: PortBinding) {
        if let PortBinding::Audio(slot) = binding {
            self.outputs.push(slot);
        }
    }

    fn configure(&mut self, _controls: &ControlCells) {}

    fn run(&mut self, _pool: &mut SlotPool, _frames: usize) {}
}

/// Pipeline outlet: audio inputs only. Hosts the L/R swap flag and
/// forwards each processed block to the attached external tap.
#[derive(Default)]
pub struct SinkModule {
    inputs: Vec<SlotIndex>,
    lr_swapped: bool,
    ext: Option<Box<dyn ExtDspModule>>,
}

impl SinkModule {
    /// Creates a sink endpoint.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PluginModule for SinkModule {
    fn instantiate(&mut self, _sample_rate: u32, _env: &ExprEnv) -> Result<(), PipelineError> {
        Ok(())
    }

    fn connect_port(&mut self, _port: usize, binding: PortBinding) {
        if let PortBinding::Audio(slot) = binding {
            self.inputs.push(slot);
        }
    }

    fn configure(&mut self, _controls: &ControlCells) {}

    fn run(&mut self, pool: &mut SlotPool, frames: usize) {
        if self.lr_swapped && self.inputs.len() >= 2 && self.inputs[0] != self.inputs[1] {
            let (left, right) = pool.pair_mut(self.inputs[0], self.inputs[1]);
            for i in 0..frames {
                core::mem::swap(&mut left[i], &mut right[i]);
            }
        }

        if let Some(ext) = self.ext.as_mut() {
            let visible = &self.inputs[..self.inputs.len().min(MAX_EXT_DSP_PORTS)];
            let mut ports = pool.multi_mut(visible);
            if ports.len() == visible.len() {
                ext.run(ports.as_mut_slice(), frames);
            } else {
                warn!("sink tap skipped: input slots alias each other");
            }
        }
    }

    fn set_ext_module(&mut self, ext: Option<Box<dyn ExtDspModule>>) {
        self.ext = ext;
    }

    fn set_lr_swapped(&mut self, swapped: bool) {
        self.lr_swapped = swapped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: std::sync::mpsc::Sender<Vec<f32>>,
    }

    impl ExtDspModule for Recorder {
        fn configure(&mut self, _buffer_size: usize, _num_channels: usize, _rate: u32) {}
        fn run(&mut self, ports: &mut [&mut [f32]], frames: usize) {
            for port in ports.iter() {
                let _ = self.seen.send(port[..frames].to_vec());
            }
        }
    }

    fn sink_with_slots(slots: &[usize]) -> SinkModule {
        let mut sink = SinkModule::new();
        for (i, &slot) in slots.iter().enumerate() {
            sink.connect_port(i, PortBinding::Audio(SlotIndex(slot)));
        }
        sink
    }

    #[test]
    fn swap_exchanges_channels() {
        let mut pool = SlotPool::new(2);
        pool.slot_mut(SlotIndex(0))[..2].copy_from_slice(&[1.0, 2.0]);
        pool.slot_mut(SlotIndex(1))[..2].copy_from_slice(&[3.0, 4.0]);

        let mut sink = sink_with_slots(&[0, 1]);
        sink.set_lr_swapped(true);
        sink.run(&mut pool, 2);

        assert_eq!(&pool.slot(SlotIndex(0))[..2], &[3.0, 4.0]);
        assert_eq!(&pool.slot(SlotIndex(1))[..2], &[1.0, 2.0]);
    }

    #[test]
    fn tap_sees_sink_inputs() {
        let mut pool = SlotPool::new(2);
        pool.slot_mut(SlotIndex(0))[..2].copy_from_slice(&[0.5, -0.5]);
        pool.slot_mut(SlotIndex(1))[..2].copy_from_slice(&[0.25, 0.75]);

        let (tx, rx) = std::sync::mpsc::channel();
        let mut sink = sink_with_slots(&[0, 1]);
        sink.set_ext_module(Some(Box::new(Recorder { seen: tx })));
        sink.run(&mut pool, 2);

        assert_eq!(rx.recv().unwrap(), vec![0.5, -0.5]);
        assert_eq!(rx.recv().unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn tap_survives_replacement() {
        let mut sink = sink_with_slots(&[0]);
        let (tx, rx) = std::sync::mpsc::channel();
        sink.set_ext_module(Some(Box::new(Recorder { seen: tx })));
        sink.set_ext_module(None);
        let mut pool = SlotPool::new(1);
        sink.run(&mut pool, 1);
        assert!(rx.try_recv().is_err());
    }
}
