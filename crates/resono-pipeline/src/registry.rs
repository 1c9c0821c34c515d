//! Label → factory table for plugin modules.

use crate::PipelineError;
use crate::builtin::{DrcModule, Eq2Module, GainModule, SinkModule, SourceModule};
use crate::module::PluginModule;
use resono_graph::PluginDesc;

/// Factory function producing a fresh module for a plugin description.
pub type ModuleFactory = fn(&PluginDesc) -> Box<dyn PluginModule>;

struct RegistryEntry {
    label: &'static str,
    factory: ModuleFactory,
}

/// Registry of module implementations, keyed by plugin label.
///
/// All builtin modules are registered by [`new`](Self::new); embedders and
/// tests may add their own labels with [`register`](Self::register).
pub struct PluginRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Creates a registry with the builtin modules registered.
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::with_capacity(8),
        };
        registry.register("source", |_| Box::new(SourceModule::new()));
        registry.register("sink", |_| Box::new(SinkModule::new()));
        registry.register("drc", |_| Box::new(DrcModule::new()));
        registry.register("eq2", |_| Box::new(Eq2Module::new()));
        registry.register("gain", |_| Box::new(GainModule::new()));
        registry
    }

    /// Registers (or overrides) a label.
    pub fn register(&mut self, label: &'static str, factory: ModuleFactory) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.label == label) {
            entry.factory = factory;
        } else {
            self.entries.push(RegistryEntry { label, factory });
        }
    }

    /// Materializes the module for a plugin. Only `builtin` plugins are
    /// supported; unknown labels fail with
    /// [`PipelineError::UnknownPlugin`].
    pub fn create(&self, plugin: &PluginDesc) -> Result<Box<dyn PluginModule>, PipelineError> {
        if plugin.library != "builtin" {
            return Err(PipelineError::Invalid(format!(
                "plugin '{}' wants library '{}', only builtin is supported",
                plugin.title, plugin.library
            )));
        }
        self.entries
            .iter()
            .find(|entry| entry.label == plugin.label)
            .map(|entry| (entry.factory)(plugin))
            .ok_or_else(|| PipelineError::UnknownPlugin(plugin.label.clone()))
    }

    /// Number of registered labels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(library: &str, label: &str) -> PluginDesc {
        PluginDesc {
            title: "test".into(),
            library: library.into(),
            label: label.into(),
            purpose: Some("playback".into()),
            disable_expr: None,
            ports: Vec::new(),
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = PluginRegistry::new();
        for label in ["source", "sink", "drc", "eq2", "gain"] {
            assert!(
                registry.create(&plugin("builtin", label)).is_ok(),
                "missing builtin '{label}'"
            );
        }
    }

    #[test]
    fn unknown_label_fails() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.create(&plugin("builtin", "nonexistent")),
            Err(PipelineError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn non_builtin_library_rejected() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.create(&plugin("plugin.so", "drc")),
            Err(PipelineError::Invalid(_))
        ));
    }

    #[test]
    fn register_overrides_label() {
        let mut registry = PluginRegistry::new();
        let before = registry.len();
        registry.register("gain", |_| Box::new(SourceModule::new()));
        assert_eq!(registry.len(), before);
    }
}
