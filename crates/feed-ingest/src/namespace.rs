//! Namespace descriptors
//!
//! A namespace identifies a contributing institution and supplies
//! per-institution configuration: free key-value settings, package-type
//! specific overrides layered on top of them, and validator parameter
//! tweaks. Descriptors are immutable after registration.

use crate::premis::EventConfig;
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-institution configuration record
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    /// Short identifier, e.g. `mdp`, `yale`
    pub identifier: String,
    pub description: String,
    /// Free key-value settings (layer 2 of the config resolver)
    pub config: BTreeMap<String, Value>,
    /// Settings that apply only when ingesting a given package type
    /// (layer 1 of the config resolver)
    pub packagetype_overrides: BTreeMap<String, BTreeMap<String, Value>>,
    /// Validator parameter overrides, keyed by validator identifier
    pub validation: BTreeMap<String, BTreeMap<String, Value>>,
    /// Validator overrides that apply only for a given package type
    pub packagetype_validation: BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>,
    /// Namespace-level PREMIS event configuration overrides
    pub premis_overrides: BTreeMap<String, EventConfig>,
}

impl Namespace {
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_packagetype_override(
        mut self,
        pkg_type: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.packagetype_overrides
            .entry(pkg_type.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    pub fn with_validation(
        mut self,
        validator: impl Into<String>,
        param: impl Into<String>,
        value: Value,
    ) -> Self {
        self.validation
            .entry(validator.into())
            .or_default()
            .insert(param.into(), value);
        self
    }
}

/// Namespaces shipped with the engine. Additional namespaces can be
/// registered on the engine before any volumes are built.
pub fn builtins() -> Vec<Namespace> {
    vec![
        Namespace::new("mdp", "University of Michigan")
            .with_config("artist", Value::String("University of Michigan".into())),
        Namespace::new("yale", "Yale University Library")
            .with_config("artist", Value::String("Yale University Library".into())),
        Namespace::new("test", "Test namespace"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_have_unique_identifiers() {
        let namespaces = builtins();
        let mut seen = std::collections::BTreeSet::new();
        for ns in &namespaces {
            assert!(seen.insert(ns.identifier.clone()), "duplicate {}", ns.identifier);
        }
    }

    #[test]
    fn test_builder_layers() {
        let ns = Namespace::new("foo", "Test institution")
            .with_config("artist", Value::String("Foo U".into()))
            .with_packagetype_override("simple", "artist", Value::String("Foo Digitization".into()))
            .with_validation("JPEG2000", "decomposition_levels", serde_json::json!([3, 8]));

        assert_eq!(
            ns.config.get("artist").and_then(|v| v.as_str()),
            Some("Foo U")
        );
        assert_eq!(
            ns.packagetype_overrides["simple"]
                .get("artist")
                .and_then(|v| v.as_str()),
            Some("Foo Digitization")
        );
        assert!(ns.validation["JPEG2000"].contains_key("decomposition_levels"));
    }
}
