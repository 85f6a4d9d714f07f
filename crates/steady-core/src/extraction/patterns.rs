//! Value grammars and normalizers for the three metric classes.
//!
//! Each class has two halves:
//! - a **value grammar**, spliced into scenario patterns wherever `{value}`
//!   appears, which decides what text is captured
//! - a **normalizer**, which turns the captured text into one canonical
//!   number (absolute dollars, percent points, months)
//!
//! Patterns written without `{value}` hand their whole match to the
//! normalizer, so normalization is strict: anything it cannot read becomes a
//! [`ValueParseError`] rather than a guess.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::types::MetricClass;

// =============================================================================
// VALUE GRAMMARS
// =============================================================================

/// `$1,660,000`, `$1.66M`, `2.5 million`, `680k`
const CURRENCY_GRAMMAR: &str =
    r"(?:\$ ?)?\d[\d,]*(?:\.\d+)?(?: ?(?i:k|mm|m|bn|b|thousand|million|billion)\b)?";

/// `632%`, `12.5 %`, `40 percent`
const PERCENT_GRAMMAR: &str = r"\d[\d,]*(?:\.\d+)? ?(?:%|(?i:percent)\b)";

/// `4.9 months`, `2 years`, `18-month`
const DURATION_GRAMMAR: &str = r"\d+(?:\.\d+)?[ -]?(?i:months?|years?)\b";

lazy_static! {
    static ref CURRENCY_VALUE: Regex = Regex::new(
        r"^\s*\$?\s*(?P<number>[\d,.]+)\s*(?P<suffix>[A-Za-z]*)\s*$"
    ).unwrap();

    static ref PERCENT_VALUE: Regex = Regex::new(
        r"^\s*(?P<number>[\d,.]+)\s*(?:%|(?i:percent))\s*$"
    ).unwrap();

    static ref DURATION_VALUE: Regex = Regex::new(
        r"^\s*(?P<number>[\d,.]+)[\s-]*(?P<unit>[A-Za-z]+)\s*$"
    ).unwrap();

    /// Canonical number shape once thousands separators are removed
    static ref PLAIN_NUMBER: Regex = Regex::new(r"^\d+(?:\.\d+)?$").unwrap();
}

/// Why captured text could not be normalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueParseError {
    #[error("no value captured")]
    Empty,

    #[error("'{0}' is not a {1} value")]
    Unrecognized(String, MetricClass),

    #[error("'{0}' is not a number")]
    InvalidNumber(String),

    #[error("unknown {class} unit '{unit}'")]
    UnknownUnit { unit: String, class: MetricClass },

    #[error("'{0}' does not fit in a finite number")]
    NonFinite(String),

    #[error("'{0}' is the tail of a longer number")]
    Truncated(String),
}

/// Class-specific normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    /// Absolute dollars
    Currency,
    /// Percent points
    Percent,
    /// Months
    Duration,
}

impl Normalizer {
    pub fn for_class(class: MetricClass) -> Self {
        match class {
            MetricClass::DollarAmounts => Normalizer::Currency,
            MetricClass::Percentages => Normalizer::Percent,
            MetricClass::TimePeriods => Normalizer::Duration,
        }
    }

    pub fn class(&self) -> MetricClass {
        match self {
            Normalizer::Currency => MetricClass::DollarAmounts,
            Normalizer::Percent => MetricClass::Percentages,
            Normalizer::Duration => MetricClass::TimePeriods,
        }
    }

    /// Regex fragment `{value}` expands to.
    pub fn value_grammar(&self) -> &'static str {
        match self {
            Normalizer::Currency => CURRENCY_GRAMMAR,
            Normalizer::Percent => PERCENT_GRAMMAR,
            Normalizer::Duration => DURATION_GRAMMAR,
        }
    }

    /// Normalize captured text to the class's canonical unit.
    pub fn normalize(&self, text: &str) -> Result<f64, ValueParseError> {
        if text.trim().is_empty() {
            return Err(ValueParseError::Empty);
        }

        match self {
            Normalizer::Currency => normalize_currency(text),
            Normalizer::Percent => normalize_percent(text),
            Normalizer::Duration => normalize_duration(text),
        }
    }
}

fn parse_number(raw: &str) -> Result<f64, ValueParseError> {
    let cleaned = raw.replace(',', "");
    if !PLAIN_NUMBER.is_match(&cleaned) {
        return Err(ValueParseError::InvalidNumber(raw.to_string()));
    }

    let value: f64 = cleaned
        .parse()
        .map_err(|_| ValueParseError::InvalidNumber(raw.to_string()))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValueParseError::NonFinite(raw.to_string()))
    }
}

fn finite(value: f64, text: &str) -> Result<f64, ValueParseError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValueParseError::NonFinite(text.to_string()))
    }
}

fn currency_multiplier(suffix: &str) -> Option<f64> {
    match suffix.to_ascii_lowercase().as_str() {
        "" => Some(1.0),
        "k" | "thousand" => Some(1e3),
        "m" | "mm" | "million" => Some(1e6),
        "b" | "bn" | "billion" => Some(1e9),
        _ => None,
    }
}

fn normalize_currency(text: &str) -> Result<f64, ValueParseError> {
    let caps = CURRENCY_VALUE.captures(text).ok_or_else(|| {
        ValueParseError::Unrecognized(text.trim().to_string(), MetricClass::DollarAmounts)
    })?;

    let number = parse_number(&caps["number"])?;
    let suffix = &caps["suffix"];
    let multiplier = currency_multiplier(suffix).ok_or_else(|| ValueParseError::UnknownUnit {
        unit: suffix.to_string(),
        class: MetricClass::DollarAmounts,
    })?;

    finite(number * multiplier, text)
}

fn normalize_percent(text: &str) -> Result<f64, ValueParseError> {
    let caps = PERCENT_VALUE.captures(text).ok_or_else(|| {
        ValueParseError::Unrecognized(text.trim().to_string(), MetricClass::Percentages)
    })?;

    parse_number(&caps["number"])
}

fn normalize_duration(text: &str) -> Result<f64, ValueParseError> {
    let caps = DURATION_VALUE.captures(text).ok_or_else(|| {
        ValueParseError::Unrecognized(text.trim().to_string(), MetricClass::TimePeriods)
    })?;

    let number = parse_number(&caps["number"])?;
    let unit = &caps["unit"];
    let months_per_unit = match unit.to_ascii_lowercase().as_str() {
        "month" | "months" => 1.0,
        "year" | "years" => 12.0,
        _ => {
            return Err(ValueParseError::UnknownUnit {
                unit: unit.to_string(),
                class: MetricClass::TimePeriods,
            })
        }
    };

    finite(number * months_per_unit, text)
}
