//! End-to-end pipeline construction and execution scenarios.

use resono_dsp::{AudioFormat, SampleFormat};
use resono_graph::{ExprEnv, parse_graph};
use resono_pipeline::{
    ControlCells, ModuleProperties, Pipeline, PipelineError, PluginModule, PluginRegistry,
    PortBinding, SlotIndex, SlotPool,
};
use std::sync::Arc;

/// Stereo multiplier: doubles both channels. Optionally reports
/// INPLACE_BROKEN, in which case it refuses to write where it reads.
struct Doubler {
    inputs: [Option<SlotIndex>; 2],
    outputs: [Option<SlotIndex>; 2],
    inplace_broken: bool,
}

impl Doubler {
    fn boxed(inplace_broken: bool) -> Box<dyn PluginModule> {
        Box::new(Self {
            inputs: [None; 2],
            outputs: [None; 2],
            inplace_broken,
        })
    }
}

impl PluginModule for Doubler {
    fn instantiate(&mut self, _sample_rate: u32, _env: &ExprEnv) -> Result<(), PipelineError> {
        Ok(())
    }

    fn connect_port(&mut self, port: usize, binding: PortBinding) {
        if let PortBinding::Audio(slot) = binding {
            match port {
                0 | 1 => self.inputs[port] = Some(slot),
                2 | 3 => self.outputs[port - 2] = Some(slot),
                _ => {}
            }
        }
    }

    fn configure(&mut self, _controls: &ControlCells) {}

    fn run(&mut self, pool: &mut SlotPool, frames: usize) {
        for ch in 0..2 {
            let (Some(input), Some(output)) = (self.inputs[ch], self.outputs[ch]) else {
                continue;
            };
            if self.inplace_broken {
                assert_ne!(
                    input, output,
                    "INPLACE_BROKEN module was handed aliasing buffers"
                );
            }
            if input == output {
                let buf = pool.slot_mut(output);
                for sample in &mut buf[..frames] {
                    *sample *= 2.0;
                }
            } else {
                let (src, dst) = pool.pair_mut(input, output);
                for i in 0..frames {
                    dst[i] = src[i] * 2.0;
                }
            }
        }
    }

    fn properties(&self) -> ModuleProperties {
        if self.inplace_broken {
            ModuleProperties::INPLACE_BROKEN
        } else {
            ModuleProperties::NONE
        }
    }
}

fn registry_with_doublers() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register("mul2", |_| Doubler::boxed(false));
    registry.register("mul2_broken", |_| Doubler::boxed(true));
    registry
}

fn build(text: &str, registry: &PluginRegistry, env: &ExprEnv) -> Pipeline {
    let desc = Arc::new(parse_graph(text).expect("graph parses"));
    let mut pipeline = Pipeline::create(desc, env, "playback").expect("pipeline creates");
    pipeline.load(registry).expect("pipeline loads");
    pipeline.instantiate(48000, env).expect("pipeline instantiates");
    pipeline
}

const PASSTHROUGH_1CH: &str = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
[out]
library=builtin
label=sink
purpose=playback
input_0={a0}
";

const DOUBLER_CHAIN: &str = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[m1]
library=builtin
label=mul2
input_0={a0}
input_1={a1}
output_2={b0}
output_3={b1}
[m2]
library=builtin
label=mul2_broken
input_0={b0}
input_1={b1}
output_2={c0}
output_3={c1}
[out]
library=builtin
label=sink
purpose=playback
input_0={c0}
input_1={c1}
";

#[test]
fn passthrough_delivers_input_unchanged() {
    let registry = PluginRegistry::new();
    let env = ExprEnv::new();
    let mut pipeline = build(PASSTHROUGH_1CH, &registry, &env);

    assert_eq!(pipeline.input_channels(), 1);
    assert_eq!(pipeline.output_channels(), 1);
    assert_eq!(pipeline.peak_buffers(), 1);
    assert_eq!(pipeline.delay(), 0);

    let input = [1.0_f32, -0.5, 0.25, 0.0];
    pipeline.source_buffer_mut(0).unwrap()[..4].copy_from_slice(&input);
    pipeline.run(4).unwrap();
    assert_eq!(&pipeline.sink_buffer(0).unwrap()[..4], &input);
}

#[test]
fn doubler_chain_multiplies_twice_with_extra_slots() {
    let registry = registry_with_doublers();
    let env = ExprEnv::new();
    let mut pipeline = build(DOUBLER_CHAIN, &registry, &env);

    // Walking the chain: the source makes 2 slots live, the in-place
    // doubler reuses them, and the inplace-broken doubler must claim its
    // outputs before its inputs are released.
    assert_eq!(pipeline.peak_buffers(), 4);
    assert_eq!(pipeline.delay(), 0);
    assert_eq!(pipeline.instance_count(), 4);

    let input = [1.0_f32, 2.0, 3.0, 4.0];
    pipeline.source_buffer_mut(0).unwrap()[..4].copy_from_slice(&input);
    pipeline.source_buffer_mut(1).unwrap()[..4].copy_from_slice(&input);
    pipeline.run(4).unwrap();

    let expected = [4.0_f32, 8.0, 12.0, 16.0];
    assert_eq!(&pipeline.sink_buffer(0).unwrap()[..4], &expected);
    assert_eq!(&pipeline.sink_buffer(1).unwrap()[..4], &expected);
}

#[test]
fn inplace_broken_forces_extra_slots() {
    let registry = registry_with_doublers();
    let env = ExprEnv::new();

    // Two variants of the same chain, differing only in the middle
    // module's properties.
    let template = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[m]
library=builtin
label=LABEL
input_0={a0}
input_1={a1}
output_2={b0}
output_3={b1}
[out]
library=builtin
label=sink
purpose=playback
input_0={b0}
input_1={b1}
";
    let plain = build(&template.replace("LABEL", "mul2"), &registry, &env);
    let broken = build(&template.replace("LABEL", "mul2_broken"), &registry, &env);
    assert_eq!(plain.peak_buffers(), 2);
    assert_eq!(broken.peak_buffers(), 4);
}

#[test]
fn disabled_plugin_is_bypassed() {
    let registry = registry_with_doublers();
    let env = ExprEnv::new();

    // DOUBLER_CHAIN with a disabled doubler spliced in the middle.
    let text = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[m1]
library=builtin
label=mul2
input_0={a0}
input_1={a1}
output_2={b0}
output_3={b1}
[m25]
library=builtin
label=mul2
disable=#t
input_0={b0}
input_1={b1}
output_2={bb0}
output_3={bb1}
[m2]
library=builtin
label=mul2_broken
input_0={bb0}
input_1={bb1}
output_2={c0}
output_3={c1}
[out]
library=builtin
label=sink
purpose=playback
input_0={c0}
input_1={c1}
";
    let mut pipeline = build(text, &registry, &env);

    // Only the two live multipliers and the endpoints are instantiated.
    assert_eq!(pipeline.instance_count(), 4);

    let input = [1.0_f32, 2.0, 3.0, 4.0];
    pipeline.source_buffer_mut(0).unwrap()[..4].copy_from_slice(&input);
    pipeline.source_buffer_mut(1).unwrap()[..4].copy_from_slice(&input);
    pipeline.run(4).unwrap();
    assert_eq!(&pipeline.sink_buffer(0).unwrap()[..4], &[4.0, 8.0, 12.0, 16.0]);
}

#[test]
fn control_flow_threads_through_disabled_plugins() {
    let mut registry = registry_with_doublers();
    // An enabled control producer with a single control output port.
    struct CtlSource;
    impl PluginModule for CtlSource {
        fn instantiate(&mut self, _: u32, _: &ExprEnv) -> Result<(), PipelineError> {
            Ok(())
        }
        fn connect_port(&mut self, _: usize, _: PortBinding) {}
        fn configure(&mut self, _: &ControlCells) {}
        fn run(&mut self, _: &mut SlotPool, _: usize) {}
    }
    registry.register("ctlsrc", |_| Box::new(CtlSource));

    // csrc's control output threads through the disabled cmid into the
    // gain module's control input.
    let text = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[csrc]
library=builtin
label=ctlsrc
output_0=<g1>
[cmid]
library=builtin
label=ctlsrc
disable=#t
input_0=<g1>
output_1=<g2>
[vol]
library=builtin
label=gain
input_0={a0}
input_1={a1}
output_2={b0}
output_3={b1}
input_4=<g2>
[out]
library=builtin
label=sink
purpose=playback
input_0={b0}
input_1={b1}
";
    let env = ExprEnv::new();
    let mut pipeline = build(text, &registry, &env);
    // src, csrc, vol, sink - the disabled cmid contributes no instance.
    assert_eq!(pipeline.instance_count(), 4);

    // The producer's cell is zero, so the gain stage runs at 0 dB.
    pipeline.source_buffer_mut(0).unwrap()[0] = 0.5;
    pipeline.source_buffer_mut(1).unwrap()[0] = -0.5;
    pipeline.run(1).unwrap();
    assert_eq!(pipeline.sink_buffer(0).unwrap()[0], 0.5);
    assert_eq!(pipeline.sink_buffer(1).unwrap()[0], -0.5);
}

#[test]
fn reload_is_isomorphic() {
    let registry = registry_with_doublers();
    let env = ExprEnv::new();
    let first = build(DOUBLER_CHAIN, &registry, &env);
    let second = build(DOUBLER_CHAIN, &registry, &env);
    assert_eq!(first.delay(), second.delay());
    assert_eq!(first.peak_buffers(), second.peak_buffers());
    assert_eq!(first.instance_count(), second.instance_count());
    assert_eq!(first.label_pattern(), second.label_pattern());
}

#[test]
fn apply_identity_leaves_pcm_unchanged() {
    let registry = PluginRegistry::new();
    let env = ExprEnv::new();
    let text = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[out]
library=builtin
label=sink
purpose=playback
input_0={a0}
input_1={a1}
";
    let mut pipeline = build(text, &registry, &env);
    let format = AudioFormat::new(48000, 2, SampleFormat::S16Le);
    pipeline.validate(&format).unwrap();

    // 3000 frames exercises the chunked path (> BLOCK_MAX).
    let frames = 3000;
    let mut buf: Vec<u8> = Vec::new();
    for i in 0..frames * 2 {
        let s = ((i as i32 * 3217) % 65536 - 32768) as i16;
        buf.extend_from_slice(&s.to_le_bytes());
    }
    let original = buf.clone();
    pipeline
        .apply(&mut buf, SampleFormat::S16Le, frames)
        .unwrap();
    assert_eq!(buf, original);

    let stats = pipeline.stats();
    assert_eq!(stats.total_samples, frames as u64);
    assert_eq!(stats.total_blocks, 1);
}

#[test]
fn split_runs_match_single_run_for_stateless_graphs() {
    let registry = registry_with_doublers();
    let env = ExprEnv::new();

    let mut one = build(DOUBLER_CHAIN, &registry, &env);
    let mut two = build(DOUBLER_CHAIN, &registry, &env);

    let input: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01 - 0.3).collect();

    one.source_buffer_mut(0).unwrap()[..64].copy_from_slice(&input);
    one.source_buffer_mut(1).unwrap()[..64].copy_from_slice(&input);
    one.run(64).unwrap();
    let expected: Vec<f32> = one.sink_buffer(0).unwrap()[..64].to_vec();

    // Same frames in two runs of 24 + 40.
    let mut out = Vec::new();
    for (start, len) in [(0_usize, 24_usize), (24, 40)] {
        two.source_buffer_mut(0).unwrap()[..len].copy_from_slice(&input[start..start + len]);
        two.source_buffer_mut(1).unwrap()[..len].copy_from_slice(&input[start..start + len]);
        two.run(len).unwrap();
        out.extend_from_slice(&two.sink_buffer(0).unwrap()[..len]);
    }
    assert_eq!(out, expected);
}

#[test]
fn sink_swap_and_tap_survive_through_pipeline_api() {
    use resono_pipeline::ExtDspModule;
    use std::sync::mpsc;

    struct Tap {
        tx: mpsc::Sender<(usize, u32, Vec<f32>)>,
        geometry: (usize, u32),
    }
    impl ExtDspModule for Tap {
        fn configure(&mut self, _buffer_size: usize, num_channels: usize, rate: u32) {
            self.geometry = (num_channels, rate);
        }
        fn run(&mut self, ports: &mut [&mut [f32]], frames: usize) {
            let _ = self.tx.send((
                self.geometry.0,
                self.geometry.1,
                ports[0][..frames].to_vec(),
            ));
        }
    }

    let registry = PluginRegistry::new();
    let env = ExprEnv::new();
    let text = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[out]
library=builtin
label=sink
purpose=playback
input_0={a0}
input_1={a1}
";
    let mut pipeline = build(text, &registry, &env);
    let (tx, rx) = mpsc::channel();
    pipeline.set_sink_ext_module(Some(Box::new(Tap {
        tx,
        geometry: (0, 0),
    })));
    pipeline.set_sink_lr_swapped(true);

    pipeline.source_buffer_mut(0).unwrap()[..2].copy_from_slice(&[1.0, 2.0]);
    pipeline.source_buffer_mut(1).unwrap()[..2].copy_from_slice(&[3.0, 4.0]);
    pipeline.run(2).unwrap();

    // The swap ran before the tap, so channel 0 carries the old right.
    assert_eq!(&pipeline.sink_buffer(0).unwrap()[..2], &[3.0, 4.0]);
    assert_eq!(&pipeline.sink_buffer(1).unwrap()[..2], &[1.0, 2.0]);

    let (channels, rate, seen) = rx.recv().unwrap();
    assert_eq!(channels, 2);
    assert_eq!(rate, 48000);
    assert_eq!(seen, vec![3.0, 4.0]);
}

#[test]
fn channel_inflation_is_rejected() {
    let text = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
[out]
library=builtin
label=sink
purpose=playback
input_0={a0}
input_1={a0x}
[aux]
library=builtin
label=source
purpose=capture
output_0={a0x}
";
    // A sink with more inputs than the source has outputs.
    let desc = Arc::new(parse_graph(text).expect("graph parses"));
    let env = ExprEnv::new();
    let result = Pipeline::create(desc, &env, "playback");
    assert!(matches!(result, Err(PipelineError::Invalid(_))));
}

#[test]
fn missing_endpoint_is_rejected() {
    let text = "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
[out]
library=builtin
label=sink
purpose=capture
input_0={a0}
";
    let desc = Arc::new(parse_graph(text).expect("graph parses"));
    let env = ExprEnv::new();
    assert!(matches!(
        Pipeline::create(desc, &env, "playback"),
        Err(PipelineError::Invalid(_))
    ));
}

#[test]
fn duplicate_enabled_sources_are_rejected() {
    let text = "\
[src1]
library=builtin
label=source
purpose=playback
output_0={a0}
[src2]
library=builtin
label=source
purpose=playback
output_0={a1}
[out]
library=builtin
label=sink
purpose=playback
input_0={a0}
input_1={a1}
";
    let desc = Arc::new(parse_graph(text).expect("graph parses"));
    let env = ExprEnv::new();
    assert!(matches!(
        Pipeline::create(desc, &env, "playback"),
        Err(PipelineError::Invalid(_))
    ));
}

#[test]
fn validate_rejects_format_mismatch() {
    let registry = PluginRegistry::new();
    let env = ExprEnv::new();
    let pipeline = build(PASSTHROUGH_1CH, &registry, &env);
    let stereo = AudioFormat::new(48000, 2, SampleFormat::S16Le);
    assert!(pipeline.validate(&stereo).is_err());
    let mono = AudioFormat::new(48000, 1, SampleFormat::S16Le);
    assert!(pipeline.validate(&mono).is_ok());
}
