//! Backend Plugin Registry
//!
//! Maps backend tags to plugins. Built once at startup, then shared read-only
//! behind an `Arc` by every Provision/Delete call.

use crate::domain::ports::VolumePluginRef;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Immutable-after-startup lookup table of volume plugins
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, VolumePluginRef>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under a unique tag
    pub fn register(&mut self, tag: impl Into<String>, plugin: VolumePluginRef) -> Result<()> {
        let tag = tag.into();
        if self.plugins.contains_key(&tag) {
            return Err(Error::Configuration(format!(
                "volume plugin {} registered twice",
                tag
            )));
        }
        self.plugins.insert(tag, plugin);
        Ok(())
    }

    /// Register a plugin under its own tag
    pub fn with_plugin(mut self, plugin: VolumePluginRef) -> Result<Self> {
        let tag = plugin.type_tag().to_string();
        self.register(tag, plugin)?;
        Ok(self)
    }

    pub fn lookup(&self, tag: &str) -> Option<VolumePluginRef> {
        self.plugins.get(tag).cloned()
    }

    /// Registered tags, in sorted order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::testing::FakePlugin;
    use std::sync::Arc;

    #[test]
    fn test_register_and_lookup() {
        let registry = PluginRegistry::new()
            .with_plugin(Arc::new(FakePlugin::new("hostPath")))
            .unwrap()
            .with_plugin(Arc::new(FakePlugin::new("glusterfs")))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.tags().collect::<Vec<_>>(), vec!["glusterfs", "hostPath"]);
        assert_eq!(registry.lookup("hostPath").unwrap().type_tag(), "hostPath");
        assert!(registry.lookup("openebs").is_none());
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut registry = PluginRegistry::new();
        registry
            .register("hostPath", Arc::new(FakePlugin::new("hostPath")))
            .unwrap();
        let err = registry
            .register("hostPath", Arc::new(FakePlugin::new("hostPath")))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(registry.len(), 1);
    }
}
