//! Resono pipeline - the dynamic DSP graph engine.
//!
//! A [`Pipeline`] is the running counterpart of a static
//! [`GraphDescription`](resono_graph::GraphDescription): only the plugins
//! that are enabled under the current environment are instantiated, audio
//! ports are bound to a minimal pool of shared buffer slots, and execution
//! walks the instances in dependency order once per block.
//!
//! The crate also hosts:
//!
//! - [`PluginModule`] - the trait every processing module implements
//! - [`PluginRegistry`] - label → factory table for the builtin modules
//! - [`DspOffloadMap`] - per-device binding that reroutes eligible module
//!   chains to a hardware DSP and bypasses them in-process

pub mod builtin;
pub mod module;
pub mod offload;
pub mod pipeline;
pub mod registry;

pub use module::{
    CellIndex, ControlCells, ExtDspModule, MAX_EXT_DSP_PORTS, ModuleProperties, PluginModule,
    PortBinding, SlotIndex, SlotPool,
};
pub use offload::{DisallowReason, DspOffloadMap, MixerControl, OffloadState};
pub use pipeline::{Pipeline, PipelineStats};
pub use registry::PluginRegistry;

use thiserror::Error;

/// Errors surfaced by pipeline construction, execution, and offload.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration: missing endpoints, inconsistent flows,
    /// channel inflation, or a module contract violation.
    #[error("invalid pipeline: {0}")]
    Invalid(String),
    /// No registered implementation for a plugin label.
    #[error("unknown plugin label '{0}'")]
    UnknownPlugin(String),
    /// The module cannot produce an offload blob for its current config.
    #[error("module does not support offload in its current configuration")]
    Unsupported,
    /// A hardware mixer control operation failed.
    #[error("mixer control '{control}': {message}")]
    Mixer {
        /// Control name.
        control: String,
        /// Failure description.
        message: String,
    },
}
