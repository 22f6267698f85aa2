use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::VisionSettings;

use super::backend::DetectorBackend;
use super::backends::{BackgroundBackend, StubBackend};

/// Builds a fresh detector for one camera.
pub type DetectorFactory = Arc<dyn Fn(&VisionSettings) -> Box<dyn DetectorBackend> + Send + Sync>;

/// Registry of detector backends by name.
///
/// Backends keep per-camera state, so the registry stores factories rather than
/// instances; every camera gets its own detector.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: BTreeMap<String, DetectorFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in `background` and `stub` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("background", |settings: &VisionSettings| {
            Box::new(BackgroundBackend::from_settings(settings)) as Box<dyn DetectorBackend>
        });
        registry.register("stub", |_: &VisionSettings| {
            Box::new(StubBackend::new()) as Box<dyn DetectorBackend>
        });
        registry
    }

    /// Register a backend factory, replacing any previous one with that name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&VisionSettings) -> Box<dyn DetectorBackend> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Get a factory by name.
    pub fn factory(&self, name: &str) -> Result<DetectorFactory> {
        self.factories.get(name).cloned().ok_or_else(|| {
            anyhow!(
                "unknown detector backend '{}' (available: {})",
                name,
                self.list().join(", ")
            )
        })
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_both_backends() -> Result<()> {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["background", "stub"]);

        let settings = VisionSettings::default();
        assert_eq!(registry.factory("background")?(&settings).name(), "background");
        assert_eq!(registry.factory("stub")?(&settings).name(), "stub");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = BackendRegistry::with_builtin();
        let err = registry.factory("yolo").err().expect("unknown backend");
        assert!(err.to_string().contains("unknown detector backend 'yolo'"));
        assert!(err.to_string().contains("background, stub"));
    }

    #[test]
    fn register_replaces_existing_name() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register("motion", |_: &VisionSettings| {
            Box::new(StubBackend::new()) as Box<dyn DetectorBackend>
        });
        registry.register("motion", |settings: &VisionSettings| {
            Box::new(BackgroundBackend::from_settings(settings)) as Box<dyn DetectorBackend>
        });
        assert_eq!(registry.list(), vec!["motion"]);
        let settings = VisionSettings::default();
        assert_eq!(registry.factory("motion")?(&settings).name(), "background");
        Ok(())
    }
}
