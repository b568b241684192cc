//! Canonicalization of freshly extracted records.

use serde_json::Value as JsonValue;

use crate::{PricingRecord, Scalar};

/// Untyped record as handed over by an extractor (LLM reply, spreadsheet row).
pub type RawRecord = serde_json::Map<String, JsonValue>;

/// Fields that always hold a float or nothing after normalization.
pub const NUMERIC_FIELDS: [&str; 7] = [
    "previous_rate",
    "old_price",
    "current_rate",
    "new_price",
    "price",
    "count",
    "cost",
];

pub fn is_numeric_field(key: &str) -> bool {
    NUMERIC_FIELDS.contains(&key)
}

/// Lenient numeric parse of supplier-formatted amounts such as `"0,17838 €"`.
///
/// Currency symbols, letters, and whitespace are dropped and a decimal comma
/// becomes a decimal point. Anything that does not reduce to a float is `None`.
pub fn to_float(input: &str) -> Option<f64> {
    let cleaned: String = input
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if matches!(cleaned.as_str(), "" | "." | "-") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn coerce_number(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Number(n) if n.is_finite() => Some(*n),
        Scalar::Number(_) => None,
        Scalar::Text(s) => to_float(s),
    }
}

/// Maps free-text change labels onto `increase`, `decrease`, `unchanged` or
/// `new`. Unknown labels come back trimmed and lower-cased.
pub fn canonical_variation(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let canonical = match lowered.as_str() {
        "up" | "increase" | "inc" => "increase",
        "down" | "decrease" | "dec" => "decrease",
        "unchanged" | "no change" | "nochange" => "unchanged",
        "new" => "new",
        _ => return lowered,
    };
    canonical.to_string()
}

pub fn normalize(raw: RawRecord) -> PricingRecord {
    let record = raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::Bool(_) | JsonValue::Array(_) | JsonValue::Object(_)
                    if is_numeric_field(&key) =>
                {
                    JsonValue::Null
                }
                other => other,
            };
            (key, Scalar::from_json(value))
        })
        .collect();
    normalize_record(record)
}

/// Same as [`normalize`] for records that are already typed.
pub fn normalize_record(record: PricingRecord) -> PricingRecord {
    record
        .into_iter()
        .map(|(key, value)| {
            let value = if is_numeric_field(&key) {
                value.and_then(|v| coerce_number(&v)).map(Scalar::Number)
            } else if key == "variation" {
                value.map(|v| match v {
                    Scalar::Text(label) => Scalar::Text(canonical_variation(&label)),
                    other => other,
                })
            } else {
                value
            };
            (key, value.filter(|v| !v.is_blank()))
        })
        .collect()
}
