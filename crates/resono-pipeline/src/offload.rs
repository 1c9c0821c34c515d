//! Hardware DSP offload binding.
//!
//! A [`DspOffloadMap`] ties one device node to one firmware pipeline: it
//! knows the firmware pipeline id, the module chain eligible for offload
//! (`"drc>eq2"`), the reasons offload is currently withheld, and the state
//! machine that moves processing between the in-process pipeline and the
//! firmware:
//!
//! ```text
//! NotStarted ──first decision──► OnDsp   (offload configured and enabled)
//!                           └──► OnHost  (offload disallowed)
//! OnDsp ──set disallow──► OnHost
//! OnHost ──clear disallow + pattern matches──► OnDsp
//! any ──reset──► NotStarted
//! ```
//!
//! Entering `OnDsp` pushes every eligible module's config blob to the
//! hardware mixer, flips the firmware switch controls on, and bypasses the
//! in-process modules. Entering `OnHost` writes the canonical bypass blobs
//! where they exist, flips the switches off, and resumes in-process
//! processing.

use crate::PipelineError;
use crate::builtin::eq2_bypass_blob;
use crate::pipeline::Pipeline;
use tracing::{debug, info, warn};

/// Hardware mixer access consumed by the offload layer.
pub trait MixerControl {
    /// Verifies a control exists.
    fn probe(&mut self, control: &str) -> Result<(), PipelineError>;
    /// Writes a binary config blob to a TLV control.
    fn set_tlv_bytes(&mut self, control: &str, blob: &[u8]) -> Result<(), PipelineError>;
    /// Flips an on/off switch control.
    fn set_switch(&mut self, control: &str, enabled: bool) -> Result<(), PipelineError>;
}

/// Reasons offload is withheld. Any set bit forces in-process processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisallowReason {
    /// The offload feature flag is off.
    FeatureDisabled = 1 << 0,
    /// The device is in use as an echo reference.
    AecReference = 1 << 1,
    /// The pipeline changes channel count and cannot be mirrored.
    ChannelMismatch = 1 << 2,
    /// The active node's pattern does not cover the running pipeline.
    PatternMismatch = 1 << 3,
}

/// Where the eligible modules currently execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadState {
    /// No decision has been made yet.
    NotStarted,
    /// Modules run in-process.
    OnHost,
    /// Modules run on the firmware DSP; the in-process copies are bypassed.
    OnDsp,
}

/// One parsed `NodeTypeName:(pipeline_id,pattern)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadMapEntry {
    /// Node type name, possibly containing spaces (`Line Out`).
    pub node_type: String,
    /// Firmware pipeline identifier.
    pub pipeline_id: u32,
    /// `>`-joined eligible module labels; may be empty.
    pub pattern: String,
}

/// Parses the space-separated offload map configuration string, e.g.
/// `"Speaker:(1,drc>eq2) Line Out:(10,eq2)"`.
pub fn parse_offload_map(config: &str) -> Result<Vec<OffloadMapEntry>, PipelineError> {
    let mut entries = Vec::new();
    let mut rest = config.trim();
    while !rest.is_empty() {
        let open = rest.find(":(").ok_or_else(|| {
            PipelineError::Invalid(format!("offload map entry missing ':(' near '{rest}'"))
        })?;
        let node_type = rest[..open].trim();
        if node_type.is_empty() {
            return Err(PipelineError::Invalid("offload map entry has empty node type".into()));
        }
        let close = rest[open..]
            .find(')')
            .ok_or_else(|| PipelineError::Invalid(format!("unterminated offload map entry near '{rest}'")))?
            + open;
        let inner = &rest[open + 2..close];
        let (id, pattern) = inner.split_once(',').ok_or_else(|| {
            PipelineError::Invalid(format!("offload map entry '{inner}' missing ','"))
        })?;
        let pipeline_id = id.trim().parse::<u32>().map_err(|_| {
            PipelineError::Invalid(format!("invalid pipeline id '{id}' in offload map"))
        })?;
        entries.push(OffloadMapEntry {
            node_type: node_type.to_string(),
            pipeline_id,
            pattern: pattern.trim().to_string(),
        });
        rest = rest[close + 1..].trim_start();
    }
    Ok(entries)
}

/// Per-node offload binding and state machine.
pub struct DspOffloadMap {
    pipeline_id: u32,
    dsp_pattern: String,
    disallow_bits: u32,
    state: OffloadState,
    applied_node_idx: Option<u32>,
}

impl DspOffloadMap {
    /// Creates the map for `node_type` from the configuration string.
    ///
    /// Returns `Ok(None)` when the node type has no entry - offload is
    /// simply unavailable there.
    pub fn from_config_str(
        config: &str,
        node_type: &str,
    ) -> Result<Option<Self>, PipelineError> {
        let entry = parse_offload_map(config)?
            .into_iter()
            .find(|entry| entry.node_type == node_type);
        Ok(entry.map(|entry| Self {
            pipeline_id: entry.pipeline_id,
            dsp_pattern: entry.pattern,
            disallow_bits: 0,
            state: OffloadState::NotStarted,
            applied_node_idx: None,
        }))
    }

    /// Firmware pipeline identifier.
    pub fn pipeline_id(&self) -> u32 {
        self.pipeline_id
    }

    /// The eligible module chain for this node.
    pub fn pattern(&self) -> &str {
        &self.dsp_pattern
    }

    /// Current processing location.
    pub fn state(&self) -> OffloadState {
        self.state
    }

    /// The node index offload was last applied for.
    pub fn applied_node_idx(&self) -> Option<u32> {
        self.applied_node_idx
    }

    /// True while the firmware runs the eligible modules.
    pub fn is_applied(&self) -> bool {
        self.state == OffloadState::OnDsp
    }

    /// Sets or clears one disallow reason.
    pub fn set_disallowed(&mut self, reason: DisallowReason, disallowed: bool) {
        if disallowed {
            self.disallow_bits |= reason as u32;
        } else {
            self.disallow_bits &= !(reason as u32);
        }
    }

    /// True when any disallow reason is set.
    pub fn is_disallowed(&self) -> bool {
        self.disallow_bits != 0
    }

    /// Whether offload may be applied to a pipeline with this label
    /// pattern. An empty configured pattern matches nothing.
    pub fn allowed_for(&self, pipeline_pattern: &str) -> bool {
        !self.is_disallowed()
            && !self.dsp_pattern.is_empty()
            && self.dsp_pattern == pipeline_pattern
    }

    /// Probes every mixer control this map would touch. Run once at
    /// creation; a probe failure means the node cannot offload at all.
    pub fn probe_controls(&self, mixer: &mut dyn MixerControl) -> Result<(), PipelineError> {
        for label in self.pattern_labels() {
            mixer.probe(&blob_control_name(label, self.pipeline_id))?;
            if let Some(switch) = switch_control_name(label, self.pipeline_id) {
                mixer.probe(&switch)?;
            }
        }
        Ok(())
    }

    /// Makes (or re-makes) the offload decision for the current pipeline
    /// and node, performing the mixer writes of the resulting transition.
    pub fn update(
        &mut self,
        pipeline: &mut Pipeline,
        mixer: &mut dyn MixerControl,
        node_idx: u32,
    ) -> Result<(), PipelineError> {
        if self.allowed_for(&pipeline.label_pattern()) {
            self.enter_dsp(pipeline, mixer, node_idx)
        } else {
            self.enter_host(pipeline, mixer)
        }
    }

    /// Forgets the applied state entirely, e.g. when the device closes.
    pub fn reset(&mut self) {
        self.state = OffloadState::NotStarted;
        self.applied_node_idx = None;
    }

    fn pattern_labels(&self) -> impl Iterator<Item = &str> {
        self.dsp_pattern.split('>').filter(|label| !label.is_empty())
    }

    fn enter_dsp(
        &mut self,
        pipeline: &mut Pipeline,
        mixer: &mut dyn MixerControl,
        node_idx: u32,
    ) -> Result<(), PipelineError> {
        // Push every eligible module's blob first; a module that cannot
        // produce one vetoes the whole transition.
        let mut configs = Vec::new();
        let mut unsupported = false;
        for (label, module) in pipeline.offload_modules() {
            match module.get_offload_blob() {
                Ok(blob) => configs.push((label.to_string(), blob)),
                Err(PipelineError::Unsupported) => {
                    warn!(label, "module cannot offload; staying in-process");
                    unsupported = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if unsupported {
            return self.enter_host(pipeline, mixer);
        }

        for (label, blob) in &configs {
            mixer.set_tlv_bytes(&blob_control_name(label, self.pipeline_id), blob)?;
        }
        for (label, _) in &configs {
            if let Some(switch) = switch_control_name(label, self.pipeline_id) {
                mixer.set_switch(&switch, true)?;
            }
        }

        pipeline.apply_offload(true);
        self.state = OffloadState::OnDsp;
        self.applied_node_idx = Some(node_idx);
        info!(pipeline_id = self.pipeline_id, node_idx, "offload applied");
        Ok(())
    }

    fn enter_host(
        &mut self,
        pipeline: &mut Pipeline,
        mixer: &mut dyn MixerControl,
    ) -> Result<(), PipelineError> {
        for label in self.pattern_labels() {
            if let Some(bypass) = bypass_blob(label) {
                mixer.set_tlv_bytes(&blob_control_name(label, self.pipeline_id), &bypass)?;
            }
            if let Some(switch) = switch_control_name(label, self.pipeline_id) {
                mixer.set_switch(&switch, false)?;
            }
        }

        pipeline.apply_offload(false);
        self.state = OffloadState::OnHost;
        debug!(pipeline_id = self.pipeline_id, "offload withdrawn; processing in-process");
        Ok(())
    }
}

fn blob_control_name(label: &str, pipeline_id: u32) -> String {
    format!("{label}{pipeline_id} config")
}

/// Only the compressor has a firmware enable switch.
fn switch_control_name(label: &str, pipeline_id: u32) -> Option<String> {
    (label == "drc").then(|| format!("{label}{pipeline_id} switch"))
}

/// Canonical bypass image written when offload is withdrawn, for modules
/// that have one.
fn bypass_blob(label: &str) -> Option<Vec<u8>> {
    (label == "eq2").then(eq2_bypass_blob)
}
