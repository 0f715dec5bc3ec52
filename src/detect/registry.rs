use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::TrackerBackend;

pub type BackendConstructor = fn() -> Box<dyn TrackerBackend>;

/// Registry of tracker backends by name.
///
/// Backends are stateful per camera, so the registry hands out fresh
/// instances instead of sharing one.
pub struct TrackerRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
    default_name: Option<String>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry preloaded with the built-in backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::backends::StubTracker::NAME, || {
            Box::new(super::backends::StubTracker::new())
        });
        registry
    }

    /// Register a constructor. The first registered backend becomes the default.
    pub fn register(&mut self, name: &str, constructor: BackendConstructor) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.constructors.contains_key(name) {
            return Err(anyhow!("tracker backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Instantiate a backend by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn TrackerBackend>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            anyhow!(
                "tracker backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        let mut backend = constructor();
        backend.warm_up()?;
        Ok(backend)
    }

    pub fn create_default(&self) -> Result<Box<dyn TrackerBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no tracker backend registered"))?;
        self.create(name)
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_creates_stub() {
        let registry = TrackerRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        assert_eq!(registry.default_name(), Some("stub"));
        let backend = registry.create("stub").unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = TrackerRegistry::with_builtin();
        assert!(registry.create("yolo").is_err());
        assert!(registry.set_default("yolo").is_err());
        assert!(TrackerRegistry::new().create_default().is_err());
    }
}
