//! Human-readable rendering of normalized metric values.

use crate::types::MetricClass;

/// Compact form used in findings: `$2.00M`, `$138.33K`, `5.0%`, `4.9 months`.
pub fn compact(class: MetricClass, value: f64) -> String {
    match class {
        MetricClass::DollarAmounts => compact_dollars(value),
        MetricClass::Percentages => format!("{:.1}%", value),
        MetricClass::TimePeriods => format!("{:.1} months", value),
    }
}

/// Full form used in tables: `$1,660,000`, `632.0%`, `4.9 months`.
pub fn full(class: MetricClass, value: f64) -> String {
    match class {
        MetricClass::DollarAmounts => dollars_with_separators(value),
        _ => compact(class, value),
    }
}

fn compact_dollars(value: f64) -> String {
    const UNITS: [(f64, &str); 3] = [(1e9, "B"), (1e6, "M"), (1e3, "K")];

    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();

    // Thresholds apply to the rounded figure: 999_999.6 is $1.00M, not $1000.00K.
    for (scale, unit) in UNITS {
        if round_cents(abs / (scale / 1e3)) >= 1e3 {
            return format!("{}${:.2}{}", sign, abs / scale, unit);
        }
    }
    format!("{}${:.2}", sign, abs)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn dollars_with_separators(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let digits = format!("{:.0}", value.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}${}", sign, grouped)
}
