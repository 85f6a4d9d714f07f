//! JSON Schema validation for scenario catalogs.
//!
//! Catalog documents are validated against schema/scenario.schema.json
//! before they are deserialized, so structural problems are reported with
//! their location instead of as a generic parse error.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded catalog schema (loaded at compile time).
const SCENARIO_SCHEMA_JSON: &str = include_str!("../../../../schema/scenario.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(SCENARIO_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a catalog document (`{ scenarios: [...] }`).
///
/// Returns every violation as `"<message> at <instance path>"`.
pub fn validate_catalog_schema(catalog_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(catalog_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a single scenario document by wrapping it in a one-entry catalog.
pub fn validate_scenario_schema(scenario_json: &serde_json::Value) -> Result<(), Vec<String>> {
    validate_catalog_schema(&serde_json::json!({ "scenarios": [scenario_json] }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_scenario() -> serde_json::Value {
        serde_json::json!({
            "name": "Minimal",
            "prompt": "Compute ROI.",
            "expected_metrics": [
                { "name": "roi", "class": "percentages", "patterns": ["{value}"] }
            ],
            "tolerance": { "percentages": 5.0 }
        })
    }

    #[test]
    fn test_minimal_scenario_passes() {
        assert!(validate_scenario_schema(&minimal_scenario()).is_ok());
    }

    #[test]
    fn test_unknown_metric_class_fails() {
        let mut value = minimal_scenario();
        value["expected_metrics"][0]["class"] = serde_json::json!("ratios");
        assert!(validate_scenario_schema(&value).is_err());
    }

    #[test]
    fn test_missing_prompt_fails() {
        let mut value = minimal_scenario();
        value.as_object_mut().unwrap().remove("prompt");
        let errors = validate_scenario_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_additional_properties_fail() {
        let mut value = minimal_scenario();
        value["temperature"] = serde_json::json!(0.7);
        assert!(validate_scenario_schema(&value).is_err());
    }

    #[test]
    fn test_negative_tolerance_fails() {
        let mut value = minimal_scenario();
        value["tolerance"]["percentages"] = serde_json::json!(-2.0);
        assert!(validate_scenario_schema(&value).is_err());
    }

    #[test]
    fn test_empty_catalog_fails() {
        let catalog = serde_json::json!({ "scenarios": [] });
        assert!(validate_catalog_schema(&catalog).is_err());
    }
}
