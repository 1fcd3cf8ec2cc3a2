use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

use super::backend::DetectorBackend;

type BackendFactory = Box<dyn Fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of detector backend constructors, keyed by name.
///
/// Backends are built on demand because each run owns its backend exclusively
/// (`DetectorBackend::detect` takes `&mut self`).
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build. `blob` is the default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("blob", |settings| {
            let backend: Box<dyn DetectorBackend> =
                Box::new(super::BlobBackend::new().with_label(settings.label.clone()));
            Ok(backend)
        });
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |settings| {
            let backend: Box<dyn DetectorBackend> =
                Box::new(super::TractBackend::from_settings(settings)?);
            Ok(backend)
        });
        registry
    }

    /// Register a backend constructor. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Build the named backend.
    pub fn create(&self, name: &str, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        factory(settings)
    }

    /// Build the default backend.
    pub fn create_default(&self, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backends registered"))?;
        self.create(name, settings)
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
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
    use crate::config::ScanConfig;
    use crate::detect::ScriptedBackend;

    #[test]
    fn builtin_registry_defaults_to_blob() {
        let registry = BackendRegistry::with_builtin();
        let settings = ScanConfig::default().detector;
        assert_eq!(registry.default_name(), Some("blob"));
        let backend = registry.create_default(&settings).unwrap();
        assert_eq!(backend.name(), "blob");
        assert!(registry.list().contains(&"blob".to_string()));
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = BackendRegistry::with_builtin();
        let settings = ScanConfig::default().detector;
        assert!(registry.create("yolo", &settings).is_err());
        assert!(registry.set_default("yolo").is_err());
    }

    #[test]
    fn custom_backend_can_become_default() {
        let mut registry = BackendRegistry::with_builtin();
        registry.register("scripted", |_| {
            let backend: Box<dyn DetectorBackend> = Box::new(ScriptedBackend::new(Vec::new()));
            Ok(backend)
        });
        registry.set_default("scripted").unwrap();
        let settings = ScanConfig::default().detector;
        assert_eq!(registry.create_default(&settings).unwrap().name(), "scripted");
    }
}
