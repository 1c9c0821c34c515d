//! The plugin module contract and the shared buffer arenas.
//!
//! Modules never hold pointers into the pipeline. `connect_port` hands each
//! port a [`PortBinding`] - an index into the pipeline's audio
//! [`SlotPool`] or its [`ControlCells`] arena - and `run`/`configure`
//! receive the arenas by reference. This keeps every cross-reference an
//! integer and lets the pipeline own all audio memory.

use crate::PipelineError;
use resono_dsp::BLOCK_MAX;
use resono_graph::ExprEnv;

/// Maximum number of sink ports an external tap can observe.
pub const MAX_EXT_DSP_PORTS: usize = 8;

/// Index of an audio buffer slot in a pipeline's [`SlotPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub(crate) usize);

impl SlotIndex {
    /// Returns the raw pool index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a control value cell in a pipeline's [`ControlCells`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex(pub(crate) usize);

impl CellIndex {
    /// Returns the raw arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a module port is wired to.
#[derive(Debug, Clone, Copy)]
pub enum PortBinding {
    /// An audio buffer slot.
    Audio(SlotIndex),
    /// A control value cell (the producer's cell for connected inputs,
    /// the port's own cell otherwise).
    Control(CellIndex),
}

/// Pool of fixed-size audio buffers shared by the instances of one
/// pipeline. Each slot holds [`BLOCK_MAX`] frames.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Box<[f32]>>,
}

impl SlotPool {
    /// Allocates `count` zeroed slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count)
                .map(|_| vec![0.0_f32; BLOCK_MAX].into_boxed_slice())
                .collect(),
        }
    }

    /// Number of slots in the pool.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Read access to one slot.
    #[inline]
    pub fn slot(&self, idx: SlotIndex) -> &[f32] {
        &self.slots[idx.0]
    }

    /// Write access to one slot.
    #[inline]
    pub fn slot_mut(&mut self, idx: SlotIndex) -> &mut [f32] {
        &mut self.slots[idx.0]
    }

    /// Write access to two distinct slots at once.
    ///
    /// # Panics
    ///
    /// Panics if `a == b`; aliasing pairs must use [`slot_mut`](Self::slot_mut).
    pub fn pair_mut(&mut self, a: SlotIndex, b: SlotIndex) -> (&mut [f32], &mut [f32]) {
        assert_ne!(a.0, b.0, "pair_mut requires distinct slots");
        if a.0 < b.0 {
            let (head, tail) = self.slots.split_at_mut(b.0);
            (&mut head[a.0], &mut tail[0])
        } else {
            let (head, tail) = self.slots.split_at_mut(a.0);
            (&mut tail[0], &mut head[b.0])
        }
    }

    /// Write access to a set of distinct slots, in the order given.
    ///
    /// Indices must be unique; slots not named are untouched.
    pub fn multi_mut(&mut self, idxs: &[SlotIndex]) -> Vec<&mut [f32]> {
        let mut picked: Vec<Option<&mut [f32]>> = Vec::new();
        picked.resize_with(idxs.len(), || None);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(pos) = idxs.iter().position(|&idx| idx.0 == i) {
                picked[pos] = Some(slot);
            }
        }
        picked.into_iter().flatten().collect()
    }
}

/// Arena of control port values. One cell per control port; connected
/// inputs share the producer's cell.
#[derive(Debug, Default)]
pub struct ControlCells {
    values: Vec<f32>,
}

impl ControlCells {
    /// Appends a cell with an initial value, returning its index.
    pub fn push(&mut self, value: f32) -> CellIndex {
        self.values.push(value);
        CellIndex(self.values.len() - 1)
    }

    /// Reads a cell.
    #[inline]
    pub fn get(&self, idx: CellIndex) -> f32 {
        self.values[idx.0]
    }

    /// Writes a cell.
    #[inline]
    pub fn set(&mut self, idx: CellIndex, value: f32) {
        self.values[idx.0] = value;
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no cells exist.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Property bits a module reports once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleProperties(u32);

impl ModuleProperties {
    /// No special properties.
    pub const NONE: Self = Self(0);
    /// The module's output ports may not alias its input ports during one
    /// `run` call. Forces extra buffer slots at allocation time.
    pub const INPLACE_BROKEN: Self = Self(1);

    /// True if all bits of `other` are set in `self`.
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for ModuleProperties {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An external tap attached to the pipeline sink.
///
/// The sink forwards each processed block to the tap after its own run, so
/// a subscriber (e.g. an echo reference consumer) can read or rewrite the
/// sink's input buffers without the graph being rebuilt.
pub trait ExtDspModule: Send {
    /// Called when the owning pipeline (re)configures: device buffer size,
    /// channel count, and rate.
    fn configure(&mut self, buffer_size: usize, num_channels: usize, rate: u32);

    /// Processes one block. `ports` are the sink's input channel buffers,
    /// at most [`MAX_EXT_DSP_PORTS`] of them.
    fn run(&mut self, ports: &mut [&mut [f32]], frames: usize);
}

/// One processing module of a pipeline.
///
/// Lifecycle: `instantiate` → `connect_port`× → `configure` → `run`× →
/// `deinstantiate`, possibly repeated. `instantiate` must be idempotent
/// across `deinstantiate`.
pub trait PluginModule: Send {
    /// Allocates per-instance state for the given sampling rate.
    fn instantiate(&mut self, sample_rate: u32, env: &ExprEnv) -> Result<(), PipelineError>;

    /// Binds a port (by its wire index) to a buffer slot or control cell.
    fn connect_port(&mut self, port: usize, binding: PortBinding);

    /// Called once after every port is connected; reads input control
    /// cells and derives whatever the module caches for `run`.
    fn configure(&mut self, controls: &ControlCells);

    /// Serializes the module's current configuration for the hardware DSP.
    ///
    /// The default reports [`PipelineError::Unsupported`].
    fn get_offload_blob(&self) -> Result<Vec<u8>, PipelineError> {
        Err(PipelineError::Unsupported)
    }

    /// Buffering delay in frames; a function of the sample rate and input
    /// control values only. Valid after `configure`.
    fn get_delay(&self) -> u32 {
        0
    }

    /// Processes one block of `frames ≤ BLOCK_MAX` frames in place on the
    /// pool slots bound via `connect_port`.
    fn run(&mut self, pool: &mut SlotPool, frames: usize);

    /// Releases per-instance state; the module may be instantiated again.
    fn deinstantiate(&mut self) {}

    /// Property bits, cached by the pipeline at load time.
    fn properties(&self) -> ModuleProperties {
        ModuleProperties::NONE
    }

    /// Attaches or clears the external tap. Only the sink implements this;
    /// the default ignores the call.
    fn set_ext_module(&mut self, _ext: Option<Box<dyn ExtDspModule>>) {}

    /// Sets the L/R swap flag. Only the sink implements this.
    fn set_lr_swapped(&mut self, _swapped: bool) {}
}
