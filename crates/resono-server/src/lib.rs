//! Resono server - the scheduler glue.
//!
//! Two threads share the work: the *main* thread owns the graph
//! description and environment, performs pipeline (re)builds, runs timers
//! and dispatches control messages; the *audio* thread owns the devices
//! and runs pipelines on audio blocks. [`DspContext`] is the handoff
//! object between them - the main thread swaps pipelines in under a short
//! lock, the audio thread processes under the same lock.

pub mod audio_thread;
pub mod context;
pub mod message;
pub mod system_state;
pub mod timer;

pub use audio_thread::{AudioCommand, AudioThread, DeviceEntry, StreamSource};
pub use context::DspContext;
pub use message::{MessageBus, MessageKind, ServerMessage};
pub use system_state::{SharedSystemState, SystemState, shared_system_state};
pub use timer::{TimerHandle, TimerService};
