//! Dynamic pipeline: construction, buffer allocation, and execution.
//!
//! The description is static; the pipeline is the dynamic subset that is
//! actually needed once disable expressions are evaluated. Disabled
//! plugins are not instantiated - ports of enabled instances are threaded
//! *through* them to the nearest enabled producer, so a chain
//! `src → A → B → sink` with `B` disabled degenerates to `src → A → sink`
//! with no runtime cost for `B`.
//!
//! Buffer slots are assigned like registers: walking the instances in
//! execution order, an input releases its producer's slot once consumed
//! and outputs grab the lowest free slot. Modules flagged
//! `INPLACE_BROKEN` acquire their output slots before their input slots
//! are released, which is what forces the extra slot in the pool.

use crate::PipelineError;
use crate::module::{
    CellIndex, ControlCells, ExtDspModule, ModuleProperties, PluginModule, PortBinding, SlotIndex,
    SlotPool,
};
use crate::registry::PluginRegistry;
use resono_dsp::{AudioFormat, BLOCK_MAX, SampleFormat, deinterleave, interleave};
use resono_graph::{ExprEnv, GraphDescription, PluginId, PortDirection, PortType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// An audio port of an instance, bound to a pool slot.
#[derive(Debug, Clone)]
struct AudioPort {
    /// Wire index the module sees in `connect_port`.
    original_index: usize,
    /// Producing `(plugin, wire index)` for connected inputs, threaded
    /// through disabled plugins.
    peer: Option<(PluginId, usize)>,
    slot: SlotIndex,
}

/// A control port of an instance, bound to a value cell.
#[derive(Debug, Clone)]
struct ControlPort {
    original_index: usize,
    cell: CellIndex,
}

/// A live plugin: the dynamic counterpart of one enabled `PluginDesc`.
struct Instance {
    plugin: PluginId,
    input_audio: Vec<AudioPort>,
    output_audio: Vec<AudioPort>,
    input_control: Vec<ControlPort>,
    output_control: Vec<ControlPort>,
    module: Option<Box<dyn PluginModule>>,
    instantiated: bool,
    properties: ModuleProperties,
    /// Total buffering delay from the source, in frames.
    total_delay: u32,
}

/// Per-pipeline processing statistics, updated on the audio thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// Accumulated processing time across all blocks.
    pub total_time: Duration,
    /// Largest single-block processing time.
    pub max_time: Duration,
    /// Smallest single-block processing time.
    pub min_time: Duration,
    /// Number of blocks processed.
    pub total_blocks: u64,
    /// Number of sample frames processed.
    pub total_samples: u64,
}

impl PipelineStats {
    fn add(&mut self, delta: Duration, samples: usize) {
        if samples == 0 {
            return;
        }
        if self.total_blocks == 0 {
            self.max_time = delta;
            self.min_time = delta;
        } else {
            self.max_time = self.max_time.max(delta);
            self.min_time = self.min_time.min(delta);
        }
        self.total_blocks += 1;
        self.total_samples += samples as u64;
        self.total_time += delta;
    }
}

/// The dynamic DSP graph: topologically ordered instances, a minimal slot
/// pool, and the source/sink endpoints data flows through.
pub struct Pipeline {
    desc: Arc<GraphDescription>,
    purpose: String,
    instances: Vec<Instance>,
    pool: SlotPool,
    cells: ControlCells,
    peak_buf: usize,
    source_idx: usize,
    sink_idx: usize,
    input_channels: usize,
    output_channels: usize,
    /// Zero until `instantiate` has been called.
    sample_rate: u32,
    offload_applied: bool,
    stats: PipelineStats,
}

impl Pipeline {
    /// Builds the dynamic graph for `purpose` from a description and an
    /// environment: exactly one enabled source and sink must exist, and
    /// every enabled plugin reachable from the sink becomes an instance in
    /// dependency order.
    pub fn create(
        desc: Arc<GraphDescription>,
        env: &ExprEnv,
        purpose: &str,
    ) -> Result<Self, PipelineError> {
        let source = find_enabled_builtin(&desc, "source", purpose, env)?;
        let sink = find_enabled_builtin(&desc, "sink", purpose, env)?;

        let mut instances = Vec::new();
        let mut cells = ControlCells::default();
        let mut visited = vec![false; desc.plugins.len()];
        topological_sort(&desc, env, sink, &mut visited, &mut instances, &mut cells)?;

        let source_idx = instances
            .iter()
            .position(|inst| inst.plugin == source)
            .ok_or_else(|| PipelineError::Invalid("source not reachable from sink".into()))?;
        let sink_idx = instances
            .iter()
            .position(|inst| inst.plugin == sink)
            .ok_or_else(|| PipelineError::Invalid("sink instance missing".into()))?;

        let input_channels = instances[source_idx].output_audio.len();
        let output_channels = instances[sink_idx].input_audio.len();
        if output_channels > input_channels {
            // Can't increase channel count, nowhere to put them.
            return Err(PipelineError::Invalid(format!(
                "pipeline outputs more channels than it inputs ({output_channels} > {input_channels})"
            )));
        }

        debug!(purpose, instances = instances.len(), "pipeline created");
        Ok(Self {
            desc,
            purpose: purpose.to_string(),
            instances,
            pool: SlotPool::new(0),
            cells,
            peak_buf: 0,
            source_idx,
            sink_idx,
            input_channels,
            output_channels,
            sample_rate: 0,
            offload_applied: false,
            stats: PipelineStats::default(),
        })
    }

    /// Materializes every instance's module through the registry and
    /// assigns buffer slots.
    pub fn load(&mut self, registry: &PluginRegistry) -> Result<(), PipelineError> {
        for instance in &mut self.instances {
            let plugin = self.desc.plugin(instance.plugin);
            let module = registry.create(plugin)?;
            instance.properties = module.properties();
            instance.module = Some(module);
        }
        self.allocate_buffers()
    }

    /// Instantiates modules at a sample rate, connects every port, runs
    /// `configure`, and computes cumulative delays.
    ///
    /// On failure the partially built state is torn down by `Drop`.
    pub fn instantiate(&mut self, sample_rate: u32, env: &ExprEnv) -> Result<(), PipelineError> {
        for instance in &mut self.instances {
            let module = instance
                .module
                .as_mut()
                .ok_or_else(|| PipelineError::Invalid("pipeline not loaded".into()))?;
            module.instantiate(sample_rate, env)?;
            instance.instantiated = true;
        }
        self.sample_rate = sample_rate;

        for instance in &mut self.instances {
            let module = instance
                .module
                .as_mut()
                .ok_or_else(|| PipelineError::Invalid("pipeline not loaded".into()))?;
            for port in &instance.input_audio {
                module.connect_port(port.original_index, PortBinding::Audio(port.slot));
            }
            for port in &instance.output_audio {
                module.connect_port(port.original_index, PortBinding::Audio(port.slot));
            }
            for port in &instance.input_control {
                module.connect_port(port.original_index, PortBinding::Control(port.cell));
            }
            for port in &instance.output_control {
                module.connect_port(port.original_index, PortBinding::Control(port.cell));
            }
        }

        for instance in &mut self.instances {
            if let Some(module) = instance.module.as_mut() {
                module.configure(&self.cells);
            }
        }

        self.calculate_audio_delay();
        Ok(())
    }

    /// Deinstantiates every module, keeping them loadable again.
    pub fn deinstantiate(&mut self) {
        for instance in &mut self.instances {
            if instance.instantiated {
                if let Some(module) = instance.module.as_mut() {
                    module.deinstantiate();
                }
                instance.instantiated = false;
            }
        }
        self.sample_rate = 0;
    }

    /// Total buffering delay from source to sink, in frames.
    pub fn delay(&self) -> u32 {
        self.instances[self.sink_idx].total_delay
    }

    /// Sample rate set at instantiation; zero before.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channels entering the pipeline at the source.
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Channels leaving the pipeline at the sink.
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Peak number of simultaneously live audio slots.
    pub fn peak_buffers(&self) -> usize {
        self.peak_buf
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Whether hardware offload currently bypasses in-process modules.
    pub fn offload_applied(&self) -> bool {
        self.offload_applied
    }

    /// Running statistics snapshot.
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// The purpose this pipeline was built for.
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// `>`-joined labels of the non-endpoint instances, e.g. `"drc>eq2"`.
    /// This is what offload eligibility is matched against.
    pub fn label_pattern(&self) -> String {
        let mut pattern = String::new();
        for instance in &self.instances {
            let label = &self.desc.plugin(instance.plugin).label;
            if is_endpoint(label) {
                continue;
            }
            if !pattern.is_empty() {
                pattern.push('>');
            }
            pattern.push_str(label);
        }
        pattern
    }

    /// Labels and modules of the non-endpoint instances, for offload
    /// configuration.
    pub fn offload_modules(&self) -> impl Iterator<Item = (&str, &dyn PluginModule)> {
        self.instances.iter().filter_map(|instance| {
            let label = self.desc.plugin(instance.plugin).label.as_str();
            if is_endpoint(label) {
                return None;
            }
            instance
                .module
                .as_deref()
                .map(|module| (label, module))
        })
    }

    /// Low-level offload toggle. Channel-variant pipelines cannot be
    /// offloaded; the request is ignored with an error log.
    pub fn apply_offload(&mut self, applied: bool) {
        if self.input_channels != self.output_channels {
            error!(
                input = self.input_channels,
                output = self.output_channels,
                "cannot offload a channel-variant pipeline"
            );
            return;
        }
        debug!(applied, "pipeline offload");
        self.offload_applied = applied;
    }

    /// Requires the pipeline's channel counts to match the device format.
    pub fn validate(&self, format: &AudioFormat) -> Result<(), PipelineError> {
        if self.input_channels != format.num_channels {
            return Err(PipelineError::Invalid(format!(
                "pipeline source has {} channels, device has {}",
                self.input_channels, format.num_channels
            )));
        }
        if self.output_channels != format.num_channels {
            return Err(PipelineError::Invalid(format!(
                "pipeline sink has {} channels, device has {}",
                self.output_channels, format.num_channels
            )));
        }
        Ok(())
    }

    /// Attaches an external tap to the sink. The tap is configured with
    /// this pipeline's geometry first, and survives until replaced or the
    /// pipeline is rebuilt.
    pub fn set_sink_ext_module(&mut self, mut ext: Option<Box<dyn ExtDspModule>>) {
        if let Some(ext) = ext.as_mut() {
            ext.configure(BLOCK_MAX, self.output_channels, self.sample_rate);
        }
        if let Some(module) = self.instances[self.sink_idx].module.as_mut() {
            module.set_ext_module(ext);
        }
    }

    /// Sets the sink's L/R swap flag.
    pub fn set_sink_lr_swapped(&mut self, swapped: bool) {
        if let Some(module) = self.instances[self.sink_idx].module.as_mut() {
            module.set_lr_swapped(swapped);
        }
    }

    /// Mutable view of a source channel buffer.
    ///
    /// While offload is applied, the source buffer *is* the sink buffer:
    /// written samples flow straight to the sink.
    pub fn source_buffer_mut(&mut self, channel: usize) -> Option<&mut [f32]> {
        let slot = self.source_slot(channel)?;
        Some(self.pool.slot_mut(slot))
    }

    /// Read view of a sink channel buffer.
    pub fn sink_buffer(&self, channel: usize) -> Option<&[f32]> {
        let slot = self.sink_slot(channel)?;
        Some(self.pool.slot(slot))
    }

    fn source_slot(&self, channel: usize) -> Option<SlotIndex> {
        if self.offload_applied {
            return self.sink_slot(channel);
        }
        self.instances[self.source_idx]
            .output_audio
            .get(channel)
            .map(|p| p.slot)
    }

    fn sink_slot(&self, channel: usize) -> Option<SlotIndex> {
        self.instances[self.sink_idx]
            .input_audio
            .get(channel)
            .map(|p| p.slot)
    }

    /// Runs one block of `frames ≤ BLOCK_MAX` through the instances in
    /// order. While offload is applied only the sink runs (for the L/R
    /// swap and the external tap).
    pub fn run(&mut self, frames: usize) -> Result<(), PipelineError> {
        debug_assert!(frames <= BLOCK_MAX);
        let pool = &mut self.pool;

        if self.offload_applied {
            let sink = &mut self.instances[self.sink_idx];
            let module = sink
                .module
                .as_mut()
                .ok_or_else(|| PipelineError::Invalid("no module for sink instance".into()))?;
            module.run(pool, frames);
            return Ok(());
        }

        for instance in &mut self.instances {
            let module = instance
                .module
                .as_mut()
                .ok_or_else(|| PipelineError::Invalid("instance has no module".into()))?;
            module.run(pool, frames);
        }
        Ok(())
    }

    /// Full-frame path: deinterleaves raw PCM into the source buffers,
    /// runs the pipeline in chunks of at most [`BLOCK_MAX`] frames, and
    /// interleaves the sink output back into the same byte buffer.
    pub fn apply(
        &mut self,
        buf: &mut [u8],
        format: SampleFormat,
        frames: usize,
    ) -> Result<(), PipelineError> {
        if frames == 0 {
            return Ok(());
        }
        let begin = Instant::now();

        let source_slots: Vec<SlotIndex> = (0..self.input_channels)
            .map(|ch| {
                self.source_slot(ch)
                    .ok_or_else(|| PipelineError::Invalid(format!("no source buffer for channel {ch}")))
            })
            .collect::<Result<_, _>>()?;
        let sink_slots: Vec<SlotIndex> = (0..self.output_channels)
            .map(|ch| {
                self.sink_slot(ch)
                    .ok_or_else(|| PipelineError::Invalid(format!("no sink buffer for channel {ch}")))
            })
            .collect::<Result<_, _>>()?;

        let in_frame_bytes = self.input_channels * format.bytes_per_sample();
        let out_frame_bytes = self.output_channels * format.bytes_per_sample();

        let mut read_offset = 0;
        let mut write_offset = 0;
        let mut remaining = frames;
        while remaining > 0 {
            let chunk = remaining.min(BLOCK_MAX);

            {
                let mut channels = self.pool.multi_mut(&source_slots);
                deinterleave(&buf[read_offset..], channels.as_mut_slice(), format, chunk);
            }

            self.run(chunk)?;

            {
                let channels: Vec<&[f32]> =
                    sink_slots.iter().map(|&slot| self.pool.slot(slot)).collect();
                interleave(&channels, &mut buf[write_offset..], format, chunk);
            }

            read_offset += chunk * in_frame_bytes;
            write_offset += chunk * out_frame_bytes;
            remaining -= chunk;
        }

        self.stats.add(begin.elapsed(), frames);
        Ok(())
    }

    /// Logs a summary of the pipeline state and statistics.
    pub fn dump(&self) {
        debug!(
            purpose = %self.purpose,
            input_channels = self.input_channels,
            output_channels = self.output_channels,
            sample_rate = self.sample_rate,
            offload_applied = self.offload_applied,
            peak_buf = self.peak_buf,
            blocks = self.stats.total_blocks,
            samples = self.stats.total_samples,
            total_time = ?self.stats.total_time,
            min_time = ?self.stats.min_time,
            max_time = ?self.stats.max_time,
            "pipeline dump"
        );
        for (i, instance) in self.instances.iter().enumerate() {
            let plugin = self.desc.plugin(instance.plugin);
            debug!(
                index = i,
                title = %plugin.title,
                label = %plugin.label,
                total_delay = instance.total_delay,
                audio_in = instance.input_audio.len(),
                audio_out = instance.output_audio.len(),
                "pipeline instance"
            );
        }
    }

    // --- construction helpers ---

    /// Computes the peak number of live slots and assigns one to every
    /// audio port.
    fn allocate_buffers(&mut self) -> Result<(), PipelineError> {
        let mut need: isize = 0;
        let mut peak: isize = 0;
        for instance in &self.instances {
            let inputs = instance.input_audio.len() as isize;
            let outputs = instance.output_audio.len() as isize;
            if instance.properties.contains(ModuleProperties::INPLACE_BROKEN) {
                // Output slots are acquired before input slots release.
                need += outputs;
                peak = peak.max(need);
                need -= inputs;
            } else {
                need += outputs - inputs;
                peak = peak.max(need);
            }
        }
        // A valid pipeline always has a source with outputs and no inputs.
        if peak <= 0 {
            return Err(PipelineError::Invalid(format!(
                "peak buffer count {peak} must be positive"
            )));
        }

        self.peak_buf = peak as usize;
        self.pool = SlotPool::new(self.peak_buf);

        let mut busy = vec![false; self.peak_buf];
        for idx in 0..self.instances.len() {
            // Inputs inherit their producer's slot.
            let inherited: Vec<SlotIndex> = self.instances[idx]
                .input_audio
                .iter()
                .map(|port| {
                    let (peer_plugin, peer_index) = port.peer.ok_or_else(|| {
                        PipelineError::Invalid("audio input port has no producer".into())
                    })?;
                    self.output_slot_of(peer_plugin, peer_index).ok_or_else(|| {
                        PipelineError::Invalid("audio input references unknown producer".into())
                    })
                })
                .collect::<Result<_, _>>()?;
            for (port, slot) in self.instances[idx].input_audio.iter_mut().zip(&inherited) {
                port.slot = *slot;
            }

            let instance = &mut self.instances[idx];
            if instance.properties.contains(ModuleProperties::INPLACE_BROKEN) {
                use_buffers(&mut busy, &mut instance.output_audio);
                unuse_buffers(&mut busy, &instance.input_audio);
            } else {
                unuse_buffers(&mut busy, &instance.input_audio);
                use_buffers(&mut busy, &mut instance.output_audio);
            }
        }
        Ok(())
    }

    fn output_slot_of(&self, plugin: PluginId, original_index: usize) -> Option<SlotIndex> {
        let instance = self.instances.iter().find(|inst| inst.plugin == plugin)?;
        instance
            .output_audio
            .iter()
            .find(|port| port.original_index == original_index)
            .map(|port| port.slot)
    }

    /// Total delay of each instance = max over upstream producers + own
    /// module delay. Instances are in dependency order, so one pass works.
    fn calculate_audio_delay(&mut self) {
        for idx in 0..self.instances.len() {
            let mut delay = 0;
            for port in &self.instances[idx].input_audio {
                if let Some((peer_plugin, _)) = port.peer
                    && let Some(upstream) =
                        self.instances.iter().find(|inst| inst.plugin == peer_plugin)
                {
                    delay = delay.max(upstream.total_delay);
                }
            }
            let own = self.instances[idx]
                .module
                .as_ref()
                .map_or(0, |module| module.get_delay());
            self.instances[idx].total_delay = delay + own;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.deinstantiate();
    }
}

/// Marks the first free slot busy for every output port, in port order.
fn use_buffers(busy: &mut [bool], ports: &mut [AudioPort]) {
    let mut k = 0;
    for port in ports.iter_mut() {
        while busy[k] {
            k += 1;
        }
        port.slot = SlotIndex(k);
        busy[k] = true;
    }
}

/// Releases the slots the given ports occupy.
fn unuse_buffers(busy: &mut [bool], ports: &[AudioPort]) {
    for port in ports {
        busy[port.slot.index()] = false;
    }
}

fn is_endpoint(label: &str) -> bool {
    label == "source" || label == "sink"
}

/// Finds the unique enabled builtin plugin with `label` for `purpose`.
fn find_enabled_builtin(
    desc: &GraphDescription,
    label: &str,
    purpose: &str,
    env: &ExprEnv,
) -> Result<PluginId, PipelineError> {
    let mut found = None;
    for (id, plugin) in desc.plugins_with_ids() {
        if plugin.library != "builtin"
            || plugin.label != label
            || plugin.purpose.as_deref() != Some(purpose)
            || plugin.is_disabled(env)
        {
            continue;
        }
        if let Some(prev) = found {
            let prev_title = &desc.plugin(prev).title;
            return Err(PipelineError::Invalid(format!(
                "two {label} plugins enabled: {prev_title} and {}",
                plugin.title
            )));
        }
        found = Some(id);
    }
    found.ok_or_else(|| {
        PipelineError::Invalid(format!("no enabled {label} plugin for purpose {purpose}"))
    })
}

/// Depth-first dependency walk from the sink. Producers are visited before
/// consumers; disabled plugins contribute no instance, and ports of
/// enabled instances are threaded through them via `find_origin_port`.
fn topological_sort(
    desc: &GraphDescription,
    env: &ExprEnv,
    plugin_id: PluginId,
    visited: &mut [bool],
    instances: &mut Vec<Instance>,
    cells: &mut ControlCells,
) -> Result<(), PipelineError> {
    if visited[plugin_id.index()] {
        return Ok(());
    }
    visited[plugin_id.index()] = true;

    let plugin = desc.plugin(plugin_id);
    for (i, port) in plugin.ports.iter().enumerate() {
        let Some(flow_id) = port.flow else { continue };
        let flow = desc.flow(flow_id);
        let Some((from_plugin, _)) = flow.from else {
            return Err(PipelineError::Invalid(format!(
                "no plugin flows to {}:{i}",
                plugin.title
            )));
        };
        topological_sort(desc, env, from_plugin, visited, instances, cells)?;
    }

    if plugin.is_disabled(env) {
        return Ok(());
    }

    let mut instance = Instance {
        plugin: plugin_id,
        input_audio: Vec::new(),
        output_audio: Vec::new(),
        input_control: Vec::new(),
        output_control: Vec::new(),
        module: None,
        instantiated: false,
        properties: ModuleProperties::NONE,
        total_delay: 0,
    };

    for (i, port) in plugin.ports.iter().enumerate() {
        let need_connect = port.flow.is_some() && port.direction == PortDirection::Input;
        let origin = if need_connect {
            Some(find_origin_port(desc, instances, plugin_id, i)?)
        } else {
            None
        };

        match port.port_type {
            PortType::Audio => {
                let audio_port = AudioPort {
                    original_index: i,
                    peer: origin,
                    slot: SlotIndex(0),
                };
                if port.direction == PortDirection::Input {
                    instance.input_audio.push(audio_port);
                } else {
                    instance.output_audio.push(audio_port);
                }
            }
            PortType::Control => {
                let cell = match origin {
                    Some((origin_plugin, origin_index)) => instances
                        .iter()
                        .find(|inst| inst.plugin == origin_plugin)
                        .and_then(|inst| {
                            inst.output_control
                                .iter()
                                .find(|p| p.original_index == origin_index)
                        })
                        .map(|p| p.cell)
                        .ok_or_else(|| {
                            PipelineError::Invalid(format!(
                                "control input {}:{i} has no resolved producer",
                                plugin.title
                            ))
                        })?,
                    None => cells.push(port.init_value),
                };
                let control_port = ControlPort {
                    original_index: i,
                    cell,
                };
                if port.direction == PortDirection::Input {
                    instance.input_control.push(control_port);
                } else {
                    instance.output_control.push(control_port);
                }
            }
        }
    }

    instances.push(instance);
    Ok(())
}

/// Resolves where the data arriving at `plugin:index` really comes from,
/// walking upstream through disabled plugins. A disabled plugin's k-th
/// output of a type corresponds to its k-th input of the same type.
fn find_origin_port(
    desc: &GraphDescription,
    instances: &[Instance],
    plugin_id: PluginId,
    index: usize,
) -> Result<(PluginId, usize), PipelineError> {
    let plugin = desc.plugin(plugin_id);
    let port = &plugin.ports[index];
    let port_type = port.port_type;
    let flow_id = port
        .flow
        .ok_or_else(|| PipelineError::Invalid(format!("port {}:{index} has no flow", plugin.title)))?;
    let flow = desc.flow(flow_id);
    let (from_plugin, from_index) = flow
        .from
        .ok_or_else(|| PipelineError::Invalid(format!("flow '{}' has no producer", flow.name)))?;

    // An enabled producer is the origin.
    if instances.iter().any(|inst| inst.plugin == from_plugin) {
        return Ok((from_plugin, from_index));
    }

    // Producer is disabled: map its output ordinal to the matching input
    // ordinal and continue upstream.
    let from_desc = desc.plugin(from_plugin);
    let mut ordinal = 0;
    let mut found = false;
    for (i, p) in from_desc.ports.iter().enumerate() {
        if i == from_index {
            found = true;
            break;
        }
        if p.direction == PortDirection::Output && p.port_type == port_type {
            ordinal += 1;
        }
    }
    if !found {
        return Err(PipelineError::Invalid(format!(
            "flow '{}' names a missing output port",
            flow.name
        )));
    }

    let mut input_index = None;
    for (i, p) in from_desc.ports.iter().enumerate() {
        if p.direction == PortDirection::Input && p.port_type == port_type {
            if ordinal == 0 {
                input_index = Some(i);
                break;
            }
            ordinal -= 1;
        }
    }
    let input_index = input_index.ok_or_else(|| {
        PipelineError::Invalid(format!(
            "disabled plugin {} has no matching input for its output {from_index}",
            from_desc.title
        ))
    })?;

    find_origin_port(desc, instances, from_plugin, input_index)
}
