//! Go/no-go recommendation classification.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::Verdict;

lazy_static! {
    /// `Recommendation:`, `**Recommendation**:`, `5. Recommendation :`
    static ref RECOMMENDATION_HEADING: Regex =
        Regex::new(r"(?i)recommendation[*_\s]*:").unwrap();
}

// Checked in this order; the first list with a hit decides.
const NEGATIVE_PHRASES: &[&str] = &[
    "do not proceed",
    "don't proceed",
    "not recommended",
    "reconsider",
    "advise against",
];

const CAUTION_PHRASES: &[&str] = &["proceed with caution", "conditional", "carefully consider"];

const PROCEED_PHRASES: &[&str] = &["proceed", "recommend", "go ahead", "move forward", "approve"];

/// Locate the text that carries the recommendation.
///
/// Prefers everything after the last `recommendation:` heading, else the
/// first sentence mentioning both "should" and "proceed".
fn recommendation_section(text: &str) -> Option<&str> {
    if let Some(heading) = RECOMMENDATION_HEADING.find_iter(text).last() {
        return Some(&text[heading.end()..]);
    }

    text.split('.').find(|sentence| {
        let lower = sentence.to_lowercase();
        lower.contains("should") && lower.contains("proceed")
    })
}

/// Lowercase with typographic apostrophes and `DO_NOT_PROCEED`-style
/// underscores folded, so the phrase lists stay ASCII.
fn normalize(section: &str) -> String {
    section
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' | '\u{02bc}' => '\'',
            '_' => ' ',
            c => c,
        })
        .collect()
}

/// Classify the recommendation a response ends with.
pub fn classify_verdict(text: &str) -> Verdict {
    let Some(section) = recommendation_section(text) else {
        return Verdict::Unclear;
    };

    let lower = normalize(section);
    let contains_any = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if contains_any(NEGATIVE_PHRASES) {
        Verdict::DoNotProceed
    } else if contains_any(CAUTION_PHRASES) {
        Verdict::ProceedWithCaution
    } else if contains_any(PROCEED_PHRASES) {
        Verdict::Proceed
    } else {
        Verdict::Unclear
    }
}
