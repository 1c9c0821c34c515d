//! Builtin plugin modules.
//!
//! All modules in scope are compiled in; there is no dynamic loading. Two
//! of them are special: `source` and `sink` do no processing and exist to
//! mark the pipeline endpoints (the sink additionally hosts the L/R swap
//! flag and the external tap).

mod drc;
mod endpoints;
mod eq2;
mod gain;

pub use drc::DrcModule;
pub use endpoints::{SinkModule, SourceModule};
pub use eq2::{EQ2_BLOB_SIZE, Eq2Module, eq2_bypass_blob};
pub use gain::GainModule;
