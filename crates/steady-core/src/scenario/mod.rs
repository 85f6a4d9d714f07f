//! Scenario definitions and catalogs.
//!
//! A scenario is a fixed business-case prompt plus the metrics its answers
//! are expected to contain. Scenario documents are validated against JSON
//! Schema, then compiled (patterns included) into immutable [`Scenario`]s.

mod catalog;
mod parser;
pub mod schema;

pub use catalog::ScenarioCatalog;
pub use parser::{
    slugify, MetricDocument, MetricPattern, MetricSpec, Scenario, ScenarioDocument,
    VALUE_GROUP, VALUE_PLACEHOLDER,
};
