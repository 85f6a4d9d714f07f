//! Scenario catalogs: the built-in set and externally supplied files.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::parser::{Scenario, ScenarioDocument};
use super::schema;
use crate::ConfigurationError;

/// Built-in catalog (embedded at compile time).
const BUILTIN_CATALOG_YAML: &str = include_str!("../../../../scenarios/catalog.yaml");

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    scenarios: Vec<ScenarioDocument>,
}

/// An ordered, key-unique set of scenarios.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioCatalog {
    scenarios: Vec<Scenario>,
}

impl ScenarioCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::from_yaml(BUILTIN_CATALOG_YAML)
    }

    /// Parse and validate a catalog from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a catalog file. `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigurationError> {
        schema::validate_catalog_schema(&value).map_err(ConfigurationError::Schema)?;
        let doc: CatalogDocument = serde_json::from_value(value)?;

        let scenarios = doc
            .scenarios
            .into_iter()
            .map(Scenario::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(scenarios)
    }

    /// Build a catalog from already-validated scenarios.
    pub fn new(scenarios: Vec<Scenario>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for scenario in &scenarios {
            if !seen.insert(scenario.key().to_string()) {
                return Err(ConfigurationError::DuplicateScenario(
                    scenario.key().to_string(),
                ));
            }
        }
        Ok(Self { scenarios })
    }

    /// Find a scenario by key or by name (case-insensitive).
    pub fn get(&self, key_or_name: &str) -> Option<&Scenario> {
        let wanted = key_or_name.trim();
        self.scenarios.iter().find(|s| {
            s.key().eq_ignore_ascii_case(wanted) || s.name().eq_ignore_ascii_case(wanted)
        })
    }

    /// Like [`get`](Self::get), but an unknown scenario is an error.
    pub fn require(&self, key_or_name: &str) -> Result<&Scenario, ConfigurationError> {
        self.get(key_or_name)
            .ok_or_else(|| ConfigurationError::UnknownScenario(key_or_name.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.scenarios.iter().map(Scenario::key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricClass;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let keys: Vec<&str> = catalog.keys().collect();
        assert_eq!(
            keys,
            vec!["cloud-migration", "warehouse-automation", "support-chatbot"]
        );

        for scenario in catalog.iter() {
            assert_eq!(scenario.tolerance_for(MetricClass::DollarAmounts), Some(2.0));
            assert_eq!(scenario.tolerance_for(MetricClass::Percentages), Some(5.0));
            assert_eq!(scenario.tolerance_for(MetricClass::TimePeriods), Some(10.0));
            assert!(scenario.metrics().iter().all(|m| m.baseline.is_some()));
        }
    }

    #[test]
    fn test_lookup_by_key_or_name() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        assert!(catalog.get("cloud-migration").is_some());
        assert!(catalog.get("Cloud Migration ROI Analysis").is_some());
        assert!(catalog.get("CLOUD-MIGRATION").is_some());
        assert!(matches!(
            catalog.require("mainframe"),
            Err(ConfigurationError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let yaml = r#"
scenarios:
  - name: "Same"
    prompt: "a"
    expected_metrics:
      - { name: roi, class: percentages, patterns: ["{value}"] }
    tolerance: { percentages: 5.0 }
  - name: "same"
    prompt: "b"
    expected_metrics:
      - { name: roi, class: percentages, patterns: ["{value}"] }
    tolerance: { percentages: 5.0 }
"#;
        assert!(matches!(
            ScenarioCatalog::from_yaml(yaml),
            Err(ConfigurationError::DuplicateScenario(k)) if k == "same"
        ));
    }

    #[test]
    fn test_schema_violation_reports_location() {
        let yaml = r#"
scenarios:
  - name: "Bad"
    prompt: "p"
    expected_metrics: []
    tolerance: {}
"#;
        match ScenarioCatalog::from_yaml(yaml) {
            Err(ConfigurationError::Schema(errors)) => {
                assert!(errors.iter().any(|e| e.contains("expected_metrics")));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }
}
