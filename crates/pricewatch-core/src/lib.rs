//! Core pricing-record model, lane identity and snapshot diffing for pricewatch.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub mod diff;
pub mod identity;
pub mod lookup;
pub mod normalize;
pub mod price;

pub use diff::{ChangeDirection, DiffEngine, DiffPolicy, DiffResult, DiffSummary, PriceChange};
pub use identity::{identity_of, IdentityPolicy, RecordIdentity};
pub use normalize::{normalize, normalize_record, to_float, RawRecord};
pub use price::price_of;

pub const CRATE_NAME: &str = "pricewatch-core";

/// Field vocabulary produced by the extraction stage. Records may carry any
/// subset of these, or differently spelled keys.
pub const RECOGNIZED_FIELDS: [&str; 24] = [
    "provider",
    "country",
    "country_iso",
    "country_code",
    "operator",
    "network",
    "mcc",
    "mnc",
    "imsi",
    "nnc",
    "number_type",
    "destination",
    "previous_rate",
    "old_price",
    "current_rate",
    "new_price",
    "price",
    "currency",
    "variation",
    "effective_from",
    "count",
    "cost",
    "product_category",
    "notes",
];

/// A single cell value. Absence is modelled as `Option<Scalar>` on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Lossy conversion from arbitrary JSON. Never fails; `null` maps to `None`.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(Self::Text(b.to_string())),
            JsonValue::Number(n) => n.as_f64().map(Self::Number),
            JsonValue::String(s) => Some(Self::Text(s)),
            nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
                Some(Self::Text(nested.to_string()))
            }
        }
    }

    /// Text rendering used for identity dimensions and reports. Integral
    /// numbers render without a fractional part so `419` and `"419"` agree.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{n:.0}"),
            Self::Number(n) => n.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Flat, loosely-typed pricing row. Keys are kept exactly as extracted;
/// synonym resolution happens at read time (see [`lookup`]).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct PricingRecord {
    fields: BTreeMap<String, Option<Scalar>>,
}

impl PricingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_map(map: serde_json::Map<String, JsonValue>) -> Self {
        map.into_iter()
            .map(|(key, value)| (key, Scalar::from_json(value)))
            .collect()
    }

    /// Builder-style insert, mostly for fixtures and tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<Scalar>) {
        self.fields.insert(key.into(), value);
    }

    /// Exact-key access. Use [`lookup::first_value`] for tolerant access.
    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.fields.get(key).and_then(Option::as_ref)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(Scalar::as_text)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Entries whose value is present.
    pub fn present(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Option<Scalar>)> for PricingRecord {
    fn from_iter<I: IntoIterator<Item = (String, Option<Scalar>)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PricingRecord {
    type Item = (String, Option<Scalar>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Option<Scalar>>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'de> Deserialize<'de> for PricingRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::<String, JsonValue>::deserialize(deserializer)?;
        Ok(Self::from_json_map(map))
    }
}

/// All pricing records captured by one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: Option<NaiveDate>,
    pub rows: Vec<PricingRecord>,
}

impl Snapshot {
    pub fn new(date: NaiveDate, rows: Vec<PricingRecord>) -> Self {
        Self {
            date: Some(date),
            rows,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialization_tolerates_odd_value_types() {
        let record: PricingRecord = serde_json::from_value(json!({
            "country": "Kuwait",
            "mcc": 419,
            "price": null,
            "flag": true,
            "nested": {"a": 1}
        }))
        .unwrap();

        assert_eq!(record.text("country").as_deref(), Some("Kuwait"));
        assert_eq!(record.get("mcc"), Some(&Scalar::Number(419.0)));
        assert!(record.contains_key("price"));
        assert_eq!(record.get("price"), None);
        assert_eq!(record.text("flag").as_deref(), Some("true"));
        assert_eq!(record.text("nested").as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Scalar::Number(419.0).as_text(), "419");
        assert_eq!(Scalar::Number(0.0305).as_text(), "0.0305");
        assert_eq!(Scalar::from("02").as_text(), "02");
    }

    #[test]
    fn absent_values_serialize_as_null() {
        let mut record = PricingRecord::new().with("country", "Kuwait");
        record.insert("price", None);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"country": "Kuwait", "price": null}));
    }
}
