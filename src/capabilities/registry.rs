use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::builtin::{CanvasWriter, DocumentWriter, ImageWriter, SlideWriter};
use super::OutputCapability;

/// Output capabilities known to this build, by name.
///
/// The registry lists what exists; the policy decides what a job may use.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn OutputCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the document, slide, canvas and image writers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DocumentWriter));
        registry.register(Arc::new(SlideWriter));
        registry.register(Arc::new(CanvasWriter));
        registry.register(Arc::new(ImageWriter));
        registry
    }

    /// Adds a capability, replacing any previous one with the same name.
    pub fn register(&mut self, capability: Arc<dyn OutputCapability>) {
        debug!("Registered output capability: {}", capability.name());
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OutputCapability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct Echo;

    impl OutputCapability for Echo {
        fn name(&self) -> &str {
            "docx"
        }
        fn formats(&self) -> &[&'static str] {
            &[".txt"]
        }
        fn render(&self, model: &Value, _extension: &str) -> anyhow::Result<Vec<u8>> {
            Ok(model.to_string().into_bytes())
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CapabilityRegistry::with_builtins();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["canvas", "docx", "image", "pptx"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = CapabilityRegistry::with_builtins();
        registry.register(Arc::new(Echo));
        assert_eq!(registry.names().count(), 4);
        assert_eq!(registry.get("docx").unwrap().formats(), &[".txt"]);
    }

    #[test]
    fn test_unknown_capability() {
        let registry = CapabilityRegistry::new();
        assert_eq!(registry.names().count(), 0);
        assert!(registry.get("socket").is_none());
    }
}
