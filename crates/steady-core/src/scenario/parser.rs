//! Scenario parsing from YAML/JSON.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use regex::Regex;

use crate::extraction::patterns::{Normalizer, ValueParseError};
use crate::types::MetricClass;
use crate::ConfigurationError;

use super::schema;

/// Placeholder expanded to the class value grammar inside a pattern.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Name of the capture group holding the value text.
pub const VALUE_GROUP: &str = "value";

/// One candidate pattern for a metric, with the normalizer for its class.
#[derive(Debug, Clone)]
pub struct MetricPattern {
    source: String,
    regex: Regex,
    normalizer: Normalizer,
}

impl MetricPattern {
    /// Compile a pattern for a metric class.
    ///
    /// `{value}` is replaced by a named capture of the class value grammar.
    /// Without a `value` group, the whole match is normalized.
    pub fn compile(source: &str, class: MetricClass) -> Result<Self, regex::Error> {
        let normalizer = Normalizer::for_class(class);
        let expanded = source.replace(
            VALUE_PLACEHOLDER,
            &format!("(?P<{}>{})", VALUE_GROUP, normalizer.value_grammar()),
        );

        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(&expanded)?,
            normalizer,
        })
    }

    /// The pattern as declared (before placeholder expansion).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Apply the pattern to `text`.
    ///
    /// Returns `None` when the pattern does not match, otherwise the
    /// normalized value or the reason normalization failed.
    pub fn apply(&self, text: &str) -> Option<Result<f64, ValueParseError>> {
        let captures = self.regex.captures(text)?;
        let Some(value) = captures.name(VALUE_GROUP) else {
            return Some(self.normalizer.normalize(captures.get(0)?.as_str()));
        };

        // A greedy prefix can leave only the last digits of a number.
        let preceding = text[..value.start()].chars().next_back();
        if preceding.is_some_and(|c| c.is_ascii_digit() || c == ',' || c == '.') {
            return Some(Err(ValueParseError::Truncated(value.as_str().trim().to_string())));
        }
        Some(self.normalizer.normalize(value.as_str()))
    }
}

impl PartialEq for MetricPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.normalizer == other.normalizer
    }
}

impl Serialize for MetricPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// A declared metric: its class, optional baseline and candidate patterns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSpec {
    pub name: String,
    pub class: MetricClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    pub patterns: Vec<MetricPattern>,
}

/// Raw metric declaration as it appears in a scenario document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDocument {
    pub name: String,
    pub class: MetricClass,
    #[serde(default)]
    pub baseline: Option<f64>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Raw scenario as it appears in a scenario document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDocument {
    #[serde(default)]
    pub key: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub expected_metrics: Vec<MetricDocument>,
    #[serde(default)]
    pub tolerance: BTreeMap<MetricClass, f64>,
}

/// A validated, immutable business-case scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScenarioDocument")]
pub struct Scenario {
    key: String,
    name: String,
    description: String,
    #[serde(rename = "prompt")]
    prompt_template: String,
    #[serde(rename = "expected_metrics")]
    metrics: Vec<MetricSpec>,
    tolerance: BTreeMap<MetricClass, f64>,
}

fn compile_metric(doc: MetricDocument) -> Result<MetricSpec, ConfigurationError> {
    if doc.name.trim().is_empty() {
        return Err(ConfigurationError::MissingField(
            "expected_metrics.name".to_string(),
        ));
    }

    if doc.patterns.is_empty() {
        return Err(ConfigurationError::MissingField(format!(
            "expected_metrics.{}.patterns",
            doc.name
        )));
    }

    if let Some(baseline) = doc.baseline {
        if !baseline.is_finite() {
            return Err(ConfigurationError::InvalidBaseline { metric: doc.name });
        }
    }

    let patterns = doc
        .patterns
        .iter()
        .map(|p| {
            MetricPattern::compile(p, doc.class).map_err(|source| {
                ConfigurationError::InvalidPattern {
                    metric: doc.name.clone(),
                    pattern: p.clone(),
                    source,
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MetricSpec {
        name: doc.name,
        class: doc.class,
        baseline: doc.baseline,
        patterns,
    })
}

/// Derive a catalog key from a scenario name ("Cloud Migration ROI" -> "cloud-migration-roi").
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

impl TryFrom<ScenarioDocument> for Scenario {
    type Error = ConfigurationError;

    fn try_from(doc: ScenarioDocument) -> Result<Self, Self::Error> {
        if doc.name.trim().is_empty() {
            return Err(ConfigurationError::MissingField("name".to_string()));
        }

        if doc.prompt.trim().is_empty() {
            return Err(ConfigurationError::MissingField("prompt".to_string()));
        }

        if doc.expected_metrics.is_empty() {
            return Err(ConfigurationError::NoMetrics { scenario: doc.name });
        }

        for (class, value) in &doc.tolerance {
            if !value.is_finite() || *value < 0.0 {
                return Err(ConfigurationError::InvalidTolerance {
                    class: *class,
                    value: *value,
                });
            }
        }

        let mut seen = HashSet::new();
        for metric in &doc.expected_metrics {
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigurationError::DuplicateMetric(metric.name.clone()));
            }
            if !doc.tolerance.contains_key(&metric.class) {
                return Err(ConfigurationError::MissingTolerance {
                    class: metric.class,
                    metric: metric.name.clone(),
                });
            }
        }

        let metrics = doc
            .expected_metrics
            .into_iter()
            .map(compile_metric)
            .collect::<Result<Vec<_>, _>>()?;

        let key = match doc.key {
            Some(k) if !k.trim().is_empty() => k,
            _ => slugify(&doc.name),
        };

        Ok(Self {
            key,
            name: doc.name,
            description: doc.description,
            prompt_template: doc.prompt,
            metrics,
            tolerance: doc.tolerance,
        })
    }
}

impl Scenario {
    /// Parse and validate a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse and validate a scenario from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a scenario from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigurationError> {
        schema::validate_scenario_schema(&value).map_err(ConfigurationError::Schema)?;
        let doc: ScenarioDocument = serde_json::from_value(value)?;
        Self::try_from(doc)
    }

    /// Short catalog identifier.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The prompt sent verbatim on every run.
    pub fn prompt(&self) -> &str {
        &self.prompt_template
    }

    /// Declared metrics in declaration order.
    pub fn metrics(&self) -> &[MetricSpec] {
        &self.metrics
    }

    /// Look up a declared metric by name.
    pub fn metric(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Declaration position of a metric; unknown metrics sort last.
    pub fn metric_position(&self, name: &str) -> usize {
        self.metrics
            .iter()
            .position(|m| m.name == name)
            .unwrap_or(usize::MAX)
    }

    /// Tolerance (percent) for a metric class.
    pub fn tolerance_for(&self, class: MetricClass) -> Option<f64> {
        self.tolerance.get(&class).copied()
    }

    pub fn tolerances(&self) -> &BTreeMap<MetricClass, f64> {
        &self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_SCENARIO: &str = r#"
name: "Test Scenario"
description: "Minimal scenario"
prompt: "Compute the annual savings."
expected_metrics:
  - name: annual_savings
    class: dollar_amounts
    baseline: 1660000
    patterns:
      - "(?i)annual savings[^$\\n]*{value}"
  - name: payback_period
    class: time_periods
    patterns:
      - "(?i)payback[^\\d\\n]*{value}"
tolerance:
  dollar_amounts: 2.0
  time_periods: 10.0
"#;

    #[test]
    fn test_parse_valid_scenario() {
        let scenario = Scenario::from_yaml(VALID_SCENARIO).unwrap();
        assert_eq!(scenario.name(), "Test Scenario");
        assert_eq!(scenario.key(), "test-scenario");
        assert_eq!(scenario.metrics().len(), 2);
        assert_eq!(scenario.metrics()[0].name, "annual_savings");
        assert_eq!(scenario.metric_position("payback_period"), 1);
        assert_eq!(scenario.tolerance_for(MetricClass::DollarAmounts), Some(2.0));
    }

    #[test]
    fn test_missing_tolerance_for_used_class() {
        let yaml = r#"
name: "No Tolerance"
prompt: "Compute ROI."
expected_metrics:
  - name: roi
    class: percentages
    patterns: ["{value}"]
tolerance:
  dollar_amounts: 2.0
"#;
        let result = Scenario::from_yaml(yaml);
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingTolerance {
                class: MetricClass::Percentages,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let yaml = r#"
name: "Broken Pattern"
prompt: "Compute ROI."
expected_metrics:
  - name: roi
    class: percentages
    patterns: ["(unclosed {value}"]
tolerance:
  percentages: 5.0
"#;
        let result = Scenario::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::InvalidPattern { .. })));
    }

    #[test]
    fn test_duplicate_metric_names() {
        let yaml = r#"
name: "Dupes"
prompt: "Compute ROI."
expected_metrics:
  - name: roi
    class: percentages
    patterns: ["{value}"]
  - name: roi
    class: percentages
    patterns: ["{value}"]
tolerance:
  percentages: 5.0
"#;
        let result = Scenario::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::DuplicateMetric(_))));
    }

    #[test]
    fn test_missing_prompt_fails_before_anything_else() {
        let doc = ScenarioDocument {
            key: None,
            name: "Empty".to_string(),
            description: String::new(),
            prompt: "  ".to_string(),
            expected_metrics: vec![],
            tolerance: BTreeMap::new(),
        };
        let result = Scenario::try_from(doc);
        assert!(matches!(result, Err(ConfigurationError::MissingField(f)) if f == "prompt"));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let doc = ScenarioDocument {
            key: None,
            name: "Negative".to_string(),
            description: String::new(),
            prompt: "p".to_string(),
            expected_metrics: vec![MetricDocument {
                name: "roi".to_string(),
                class: MetricClass::Percentages,
                baseline: None,
                patterns: vec!["{value}".to_string()],
            }],
            tolerance: [(MetricClass::Percentages, -1.0)].into_iter().collect(),
        };
        assert!(matches!(
            Scenario::try_from(doc),
            Err(ConfigurationError::InvalidTolerance { .. })
        ));
    }

    #[test]
    fn test_pattern_without_value_group_uses_whole_match() {
        let pattern = MetricPattern::compile(r"\$[\d,]+", MetricClass::DollarAmounts).unwrap();
        let value = pattern.apply("Total: $4,760,000 per year").unwrap().unwrap();
        assert_eq!(value, 4_760_000.0);
    }

    #[test]
    fn test_value_cut_from_longer_number_is_parse_error() {
        let greedy =
            MetricPattern::compile("(?i)annual savings[^$\\n]*{value}", MetricClass::DollarAmounts)
                .unwrap();
        assert_eq!(
            greedy.apply("Annual savings: 1,660,000"),
            Some(Err(ValueParseError::Truncated("0".to_string())))
        );

        let bounded =
            MetricPattern::compile("(?i)annual savings[^$\\d\\n]*{value}", MetricClass::DollarAmounts)
                .unwrap();
        assert_eq!(bounded.apply("Annual savings: 1,660,000"), Some(Ok(1_660_000.0)));
        assert_eq!(bounded.apply("Annual savings: 1.66M"), Some(Ok(1_660_000.0)));
    }

    #[test]
    fn test_serialize_round_trips_through_document() {
        let scenario = Scenario::from_yaml(VALID_SCENARIO).unwrap();
        let json = serde_json::to_string(&scenario).unwrap();
        let back: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scenario);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Cloud Migration ROI"), "cloud-migration-roi");
        assert_eq!(slugify("AI Customer Service Chatbot!"), "ai-customer-service-chatbot");
    }
}
