//! Resono config - server-level configuration.
//!
//! The DSP graph itself lives in its own INI-like file (parsed by
//! `resono-graph`); this crate covers everything around it: where that
//! graph file is, the offload map string, and the device table.
//!
//! ```toml
//! graph_path = "/etc/resono/dsp.graph"
//! dsp_offload_map = "Speaker:(1,drc>eq2) Headphone:(6,eq2>drc)"
//!
//! [[devices]]
//! name = "Internal Speaker"
//! node_type = "Speaker"
//! purpose = "playback"
//! frame_rate = 48000
//! channels = 2
//! buffer_size = 8192
//! min_cb_level = 480
//! ```

mod error;

pub use error::ConfigError;

use resono_dsp::{AudioFormat, SampleFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline purpose a device participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Output path: client mixes flow to hardware.
    Playback,
    /// Input path: hardware samples flow to clients.
    Capture,
}

impl Purpose {
    /// The string used to select source/sink pairs in graph files.
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Playback => "playback",
            Purpose::Capture => "capture",
        }
    }
}

/// One device entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable device name.
    pub name: String,
    /// Node type the offload map is keyed by (`Speaker`, `Headphone`, …).
    #[serde(default)]
    pub node_type: String,
    /// Playback or capture.
    pub purpose: Purpose,
    /// Frames per second.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Channel count.
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Sample encoding: `s16le`, `s24le3`, or `s32le`.
    #[serde(default = "default_sample_format")]
    pub sample_format: String,
    /// Hardware ring size in frames.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Minimum hardware level before a device counts as underrun.
    #[serde(default)]
    pub min_buffer_level: usize,
    /// Smallest client callback fill in frames.
    #[serde(default = "default_min_cb_level")]
    pub min_cb_level: usize,
    /// Whether the node needs software volume (hardware held at unity).
    #[serde(default)]
    pub software_volume: bool,
    /// Whether this is a hotword detection node.
    #[serde(default)]
    pub hotword: bool,
}

fn default_frame_rate() -> u32 {
    48000
}
fn default_channels() -> usize {
    2
}
fn default_sample_format() -> String {
    "s16le".to_string()
}
fn default_buffer_size() -> usize {
    8192
}
fn default_min_cb_level() -> usize {
    480
}

impl DeviceConfig {
    /// The negotiated stream format for this device.
    pub fn audio_format(&self) -> Result<AudioFormat, ConfigError> {
        let sample_format = match self.sample_format.as_str() {
            "s16le" => SampleFormat::S16Le,
            "s24le3" => SampleFormat::S24Le3,
            "s32le" => SampleFormat::S32Le,
            other => {
                return Err(ConfigError::InvalidValue {
                    device: self.name.clone(),
                    field: "sample_format",
                    reason: format!("unknown format '{other}'"),
                });
            }
        };
        Ok(AudioFormat::new(self.frame_rate, self.channels, sample_format))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_rate == 0 {
            return Err(ConfigError::InvalidValue {
                device: self.name.clone(),
                field: "frame_rate",
                reason: "must be nonzero".into(),
            });
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(ConfigError::InvalidValue {
                device: self.name.clone(),
                field: "channels",
                reason: format!("{} is outside 1..=8", self.channels),
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                device: self.name.clone(),
                field: "buffer_size",
                reason: "must be nonzero".into(),
            });
        }
        if self.min_cb_level > self.buffer_size {
            return Err(ConfigError::InvalidValue {
                device: self.name.clone(),
                field: "min_cb_level",
                reason: "exceeds buffer_size".into(),
            });
        }
        self.audio_format().map(|_| ())
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path of the DSP graph file; absent means every device gets the
    /// trivial passthrough graph.
    #[serde(default)]
    pub graph_path: Option<PathBuf>,
    /// Offload map string, e.g. `"Speaker:(1,drc>eq2)"`.
    #[serde(default)]
    pub dsp_offload_map: String,
    /// Whether hardware DSP offload is allowed at all.
    #[serde(default)]
    pub dsp_offload_enabled: bool,
    /// Device table.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl ServerConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::read_file(path, source))?;
        Self::from_toml(&text)
    }

    /// Serializes back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for device in &self.devices {
            device.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
graph_path = "/etc/resono/dsp.graph"
dsp_offload_map = "Speaker:(1,drc>eq2)"
dsp_offload_enabled = true

[[devices]]
name = "Internal Speaker"
node_type = "Speaker"
purpose = "playback"
min_cb_level = 240

[[devices]]
name = "Internal Mic"
purpose = "capture"
channels = 1
sample_format = "s32le"
"#;

    #[test]
    fn parses_example() {
        let config = ServerConfig::from_toml(EXAMPLE).unwrap();
        assert_eq!(
            config.graph_path.as_deref(),
            Some(Path::new("/etc/resono/dsp.graph"))
        );
        assert!(config.dsp_offload_enabled);
        assert_eq!(config.devices.len(), 2);

        let speaker = &config.devices[0];
        assert_eq!(speaker.purpose, Purpose::Playback);
        assert_eq!(speaker.frame_rate, 48000);
        assert_eq!(speaker.channels, 2);
        assert_eq!(speaker.buffer_size, 8192);
        assert_eq!(speaker.min_cb_level, 240);

        let mic = &config.devices[1];
        assert_eq!(mic.purpose, Purpose::Capture);
        let format = mic.audio_format().unwrap();
        assert_eq!(format.num_channels, 1);
        assert_eq!(format.frame_bytes(), 4);
    }

    #[test]
    fn empty_config_is_valid() {
        let config = ServerConfig::from_toml("").unwrap();
        assert!(config.graph_path.is_none());
        assert!(config.devices.is_empty());
        assert!(!config.dsp_offload_enabled);
    }

    #[test]
    fn bad_sample_format_rejected() {
        let text = r#"
[[devices]]
name = "x"
purpose = "playback"
sample_format = "f64be"
"#;
        assert!(matches!(
            ServerConfig::from_toml(text),
            Err(ConfigError::InvalidValue { field: "sample_format", .. })
        ));
    }

    #[test]
    fn zero_channels_rejected() {
        let text = r#"
[[devices]]
name = "x"
purpose = "capture"
channels = 0
"#;
        assert!(ServerConfig::from_toml(text).is_err());
    }

    #[test]
    fn min_cb_level_bounded_by_buffer() {
        let text = r#"
[[devices]]
name = "x"
purpose = "playback"
buffer_size = 256
min_cb_level = 480
"#;
        assert!(ServerConfig::from_toml(text).is_err());
    }

    #[test]
    fn load_from_file_roundtrips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        let rendered = config.to_toml().unwrap();
        let reparsed = ServerConfig::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.devices.len(), config.devices.len());
        assert_eq!(reparsed.dsp_offload_map, config.dsp_offload_map);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ServerConfig::load(Path::new("/nonexistent/resono.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/resono.toml"));
    }
}
