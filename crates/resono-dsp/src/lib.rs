//! Resono DSP - signal-processing kernels for the audio server
//!
//! This crate provides the numeric core shared by the pipeline modules:
//!
//! - [`tables`] - process-wide dB/exponential lookup tables
//! - [`DrcKernel`] - single-band lookahead dynamic-range compressor
//! - [`Biquad`] - second-order IIR section used by the EQ module
//! - [`sample`] - interleaved PCM ⇄ planar float conversion
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocations in audio processing paths; all
//!   buffers are sized at construction time
//! - **Deterministic**: reconfiguring with unchanged parameters leaves
//!   every derived coefficient bitwise identical
//! - **Block oriented**: kernels process planar `f32` blocks of up to
//!   [`BLOCK_MAX`] frames in place

pub mod biquad;
pub mod drc;
pub mod sample;
pub mod tables;

pub use biquad::{Biquad, high_shelf_coefficients, low_shelf_coefficients, peaking_coefficients};
pub use drc::{DIVISION_FRAMES, DrcKernel, DrcParams, MAX_PRE_DELAY_FRAMES};
pub use sample::{AudioFormat, SampleFormat, deinterleave, interleave};
pub use tables::{
    NEG_TWO_DB, decibels_to_linear, is_bad, knee_exp, linear_to_decibels, warp_asin, warp_sin,
};

/// Maximum number of frames a pipeline processes per `run` call.
///
/// Audio buffer slots are sized to this; callers chunk longer requests.
pub const BLOCK_MAX: usize = 2048;
