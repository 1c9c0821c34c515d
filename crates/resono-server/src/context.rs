//! Pipeline handoff between the main and audio threads.
//!
//! One context exists per device pipeline. The main thread builds a new
//! pipeline *outside* the lock, swaps it in while holding the lock for
//! the duration of a pointer exchange, and tears the old one down after
//! release. The audio thread runs blocks through
//! [`with_pipeline`](DspContext::with_pipeline); a block is processed
//! entirely by whichever pipeline the swap left in place - never split.

use resono_graph::{ExprEnv, GraphDescription};
use resono_pipeline::{
    DspOffloadMap, MixerControl, Pipeline, PipelineError, PluginRegistry,
};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Handoff object: parameters to (re)build a pipeline, plus the currently
/// installed one.
pub struct DspContext {
    pipeline: Mutex<Option<Pipeline>>,
    env: Mutex<ExprEnv>,
    sample_rate: u32,
    purpose: String,
}

impl DspContext {
    /// Creates a context with the standard environment preset.
    pub fn new(sample_rate: u32, purpose: &str) -> Self {
        Self {
            pipeline: Mutex::new(None),
            env: Mutex::new(ExprEnv::standard()),
            sample_rate,
            purpose: purpose.to_string(),
        }
    }

    /// Sample rate pipelines are instantiated at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The purpose used to select source/sink pairs.
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Sets a boolean environment variable. Takes effect at the next
    /// rebuild.
    pub fn set_variable_boolean(&self, name: &str, value: bool) {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_boolean(name, value);
    }

    /// Sets an integer environment variable.
    pub fn set_variable_integer(&self, name: &str, value: i64) {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_integer(name, value);
    }

    /// Sets a string environment variable.
    pub fn set_variable_string(&self, name: &str, value: &str) {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_string(name, value);
    }

    /// Runs `f` on the installed pipeline under the context lock. Returns
    /// `None` when no pipeline is installed. This is the audio thread's
    /// only access path.
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut Pipeline) -> R) -> Option<R> {
        let mut guard = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.as_mut().map(f)
    }

    /// True if a pipeline is currently installed.
    pub fn has_pipeline(&self) -> bool {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Builds a pipeline from the description and swaps it in atomically.
    ///
    /// Construction happens outside the lock; the lock is held only for
    /// the exchange, and the previous pipeline is destroyed after release.
    /// On failure the previously installed pipeline is retained.
    pub fn load_pipeline(
        &self,
        desc: &Arc<GraphDescription>,
        registry: &PluginRegistry,
    ) -> Result<(), PipelineError> {
        let pipeline = self.prepare_pipeline(desc, registry).inspect_err(|err| {
            error!(%err, purpose = %self.purpose, "pipeline load failed; keeping previous");
        })?;

        let old = {
            let mut guard = self
                .pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.replace(pipeline)
        };
        drop(old);
        debug!(purpose = %self.purpose, "pipeline swapped");
        Ok(())
    }

    /// Installs the trivial passthrough pipeline for `num_channels`.
    pub fn load_mock_pipeline(
        &self,
        num_channels: usize,
        registry: &PluginRegistry,
    ) -> Result<(), PipelineError> {
        let desc = Arc::new(GraphDescription::mock(&self.purpose, num_channels));
        self.load_pipeline(&desc, registry)
    }

    /// Removes the installed pipeline, destroying it outside the lock.
    pub fn clear_pipeline(&self) {
        let old = {
            let mut guard = self
                .pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        drop(old);
    }

    /// Adjusts the offload state of the *running* pipeline in place. The
    /// sink's external tap and swap flag are untouched; this briefly
    /// blocks the audio thread and is only used when a node state change
    /// requires it.
    pub fn readapt_pipeline(
        &self,
        map: &mut DspOffloadMap,
        mixer: &mut dyn MixerControl,
        node_idx: u32,
    ) -> Result<(), PipelineError> {
        let mut guard = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(pipeline) => map.update(pipeline, mixer, node_idx),
            None => Err(PipelineError::Invalid("no pipeline to readapt".into())),
        }
    }

    fn prepare_pipeline(
        &self,
        desc: &Arc<GraphDescription>,
        registry: &PluginRegistry,
    ) -> Result<Pipeline, PipelineError> {
        let env = self
            .env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut pipeline = Pipeline::create(Arc::clone(desc), &env, &self.purpose)?;
        pipeline.load(registry)?;
        pipeline.instantiate(self.sample_rate, &env)?;
        if pipeline.sample_rate() != self.sample_rate {
            return Err(PipelineError::Invalid(format!(
                "pipeline sample rate {} does not match context rate {}",
                pipeline.sample_rate(),
                self.sample_rate
            )));
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resono_graph::parse_graph;

    #[test]
    fn mock_pipeline_installs_and_clears() {
        let ctx = DspContext::new(48000, "playback");
        assert!(!ctx.has_pipeline());

        let registry = PluginRegistry::new();
        ctx.load_mock_pipeline(2, &registry).unwrap();
        assert!(ctx.has_pipeline());
        assert_eq!(ctx.with_pipeline(|p| p.delay()), Some(0));

        ctx.clear_pipeline();
        assert!(!ctx.has_pipeline());
    }

    #[test]
    fn failed_load_keeps_previous_pipeline() {
        let ctx = DspContext::new(48000, "playback");
        let registry = PluginRegistry::new();
        ctx.load_mock_pipeline(2, &registry).unwrap();

        // A description with an unknown label fails at load time.
        let bad = Arc::new(
            parse_graph(
                "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
[mystery]
library=builtin
label=no_such_module
input_0={a0}
output_1={b0}
[out]
library=builtin
label=sink
purpose=playback
input_0={b0}
",
            )
            .unwrap(),
        );
        assert!(ctx.load_pipeline(&bad, &registry).is_err());
        // The mock pipeline is still there and still works.
        assert_eq!(ctx.with_pipeline(|p| p.input_channels()), Some(2));
    }

    #[test]
    fn environment_changes_take_effect_on_rebuild() {
        let ctx = DspContext::new(48000, "playback");
        let registry = PluginRegistry::new();

        // A gain plugin disabled unless dsp_name is "boost".
        let desc = Arc::new(
            parse_graph(
                "\
[src]
library=builtin
label=source
purpose=playback
output_0={a0}
output_1={a1}
[vol]
library=builtin
label=gain
disable=(not (equal? dsp_name \"boost\"))
input_0={a0}
input_1={a1}
output_2={b0}
output_3={b1}
input_4=0
[out]
library=builtin
label=sink
purpose=playback
input_0={b0}
input_1={b1}
",
            )
            .unwrap(),
        );

        ctx.load_pipeline(&desc, &registry).unwrap();
        assert_eq!(ctx.with_pipeline(|p| p.instance_count()), Some(2));

        ctx.set_variable_string("dsp_name", "boost");
        ctx.load_pipeline(&desc, &registry).unwrap();
        assert_eq!(ctx.with_pipeline(|p| p.instance_count()), Some(3));
    }

    #[test]
    fn readapt_without_pipeline_fails() {
        let ctx = DspContext::new(48000, "playback");
        let mut map = DspOffloadMap::from_config_str("Speaker:(1,drc>eq2)", "Speaker")
            .unwrap()
            .unwrap();
        struct NullMixer;
        impl MixerControl for NullMixer {
            fn probe(&mut self, _: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            fn set_tlv_bytes(&mut self, _: &str, _: &[u8]) -> Result<(), PipelineError> {
                Ok(())
            }
            fn set_switch(&mut self, _: &str, _: bool) -> Result<(), PipelineError> {
                Ok(())
            }
        }
        assert!(ctx.readapt_pipeline(&mut map, &mut NullMixer, 0).is_err());
    }
}
