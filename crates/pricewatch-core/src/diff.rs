//! Snapshot comparison: classifies lanes as new, changed, removed or unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::{identity_with_policy, IdentityPolicy, RecordIdentity};
use crate::price::{price_with_priority, FIXED_FIELDS_PRICE_PRIORITY, PRICE_PRIORITY};
use crate::{PricingRecord, Snapshot};

/// Prices closer than this are equal.
pub const DEFAULT_EPSILON: f64 = 1e-9;
pub const FIXED_FIELDS_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffPolicy {
    pub identity: IdentityPolicy,
    pub price_priority: &'static [&'static str],
    pub epsilon: f64,
}

impl DiffPolicy {
    /// Synonym-probing identity with the current-first price priority.
    pub fn tolerant() -> Self {
        Self {
            identity: IdentityPolicy::Synonyms,
            price_priority: &PRICE_PRIORITY,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Exact-key identity, rate-first price priority, tighter epsilon.
    pub fn fixed_fields() -> Self {
        Self {
            identity: IdentityPolicy::FixedFields,
            price_priority: &FIXED_FIELDS_PRICE_PRIORITY,
            epsilon: FIXED_FIELDS_EPSILON,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "tolerant" | "synonyms" => Some(Self::tolerant()),
            "fixed" | "fixed_fields" | "fixed-fields" => Some(Self::fixed_fields()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.identity {
            IdentityPolicy::Synonyms => "tolerant",
            IdentityPolicy::FixedFields => "fixed",
        }
    }
}

impl Default for DiffPolicy {
    fn default() -> Self {
        Self::tolerant()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
    /// Previous record had no resolvable price, current one does.
    PriceAppeared,
    /// Previous record had a price, current one does not.
    PriceMissing,
    /// Neither side has a price and the records differ.
    ContentChanged,
}

impl ChangeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::PriceAppeared => "price_appeared",
            Self::PriceMissing => "price_missing",
            Self::ContentChanged => "content_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub identity: RecordIdentity,
    pub before: PricingRecord,
    pub after: PricingRecord,
    pub price_before: Option<f64>,
    pub price_after: Option<f64>,
    pub delta: Option<f64>,
    pub direction: ChangeDirection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub changed: Vec<PriceChange>,
    pub new: Vec<PricingRecord>,
    pub removed: Vec<PricingRecord>,
    pub unchanged_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub changed: usize,
    pub new: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl DiffResult {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            changed: self.changed.len(),
            new: self.new.len(),
            removed: self.removed.len(),
            unchanged: self.unchanged_count,
        }
    }

    /// True when nothing was added, removed or changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.new.is_empty() && self.removed.is_empty()
    }
}

/// Identity-keyed view of one side; a later record replaces an earlier one
/// with the same identity but keeps the earlier position.
struct IdentityIndex<'a> {
    entries: Vec<(RecordIdentity, &'a PricingRecord)>,
    positions: HashMap<RecordIdentity, usize>,
}

impl<'a> IdentityIndex<'a> {
    fn get(&self, identity: &RecordIdentity) -> Option<&'a PricingRecord> {
        self.positions.get(identity).map(|&i| self.entries[i].1)
    }

    fn contains(&self, identity: &RecordIdentity) -> bool {
        self.positions.contains_key(identity)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    policy: DiffPolicy,
}

impl DiffEngine {
    pub fn new(policy: DiffPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DiffPolicy {
        &self.policy
    }

    pub fn identity_of(&self, record: &PricingRecord) -> RecordIdentity {
        identity_with_policy(record, self.policy.identity)
    }

    pub fn price_of(&self, record: &PricingRecord) -> Option<f64> {
        price_with_priority(record, self.policy.price_priority)
    }

    pub fn diff(&self, current: &Snapshot, previous: &Snapshot) -> DiffResult {
        self.diff_records(&current.rows, &previous.rows)
    }

    pub fn diff_records(
        &self,
        current: &[PricingRecord],
        previous: &[PricingRecord],
    ) -> DiffResult {
        let current = self.index(current);
        let previous = self.index(previous);
        let mut result = DiffResult::default();

        for (identity, after) in &current.entries {
            let Some(before) = previous.get(identity) else {
                result.new.push((*after).clone());
                continue;
            };
            match self.classify(identity, before, after) {
                Some(change) => result.changed.push(change),
                None => result.unchanged_count += 1,
            }
        }

        for (identity, before) in &previous.entries {
            if !current.contains(identity) {
                result.removed.push((*before).clone());
            }
        }

        result
    }

    fn index<'a>(&self, rows: &'a [PricingRecord]) -> IdentityIndex<'a> {
        let mut index = IdentityIndex {
            entries: Vec::with_capacity(rows.len()),
            positions: HashMap::with_capacity(rows.len()),
        };
        for row in rows {
            let identity = self.identity_of(row);
            match index.positions.get(&identity) {
                Some(&pos) => index.entries[pos].1 = row,
                None => {
                    index.positions.insert(identity.clone(), index.entries.len());
                    index.entries.push((identity, row));
                }
            }
        }
        index
    }

    fn classify(
        &self,
        identity: &RecordIdentity,
        before: &PricingRecord,
        after: &PricingRecord,
    ) -> Option<PriceChange> {
        let price_before = self.price_of(before);
        let price_after = self.price_of(after);

        let (delta, direction) = match (price_before, price_after) {
            (Some(old), Some(new)) => {
                let delta = new - old;
                if delta.abs() <= self.policy.epsilon {
                    return None;
                }
                let direction = if delta > 0.0 {
                    ChangeDirection::Increase
                } else {
                    ChangeDirection::Decrease
                };
                (Some(delta), direction)
            }
            (None, Some(_)) => (None, ChangeDirection::PriceAppeared),
            (Some(_), None) => (None, ChangeDirection::PriceMissing),
            (None, None) if before == after => return None,
            (None, None) => (None, ChangeDirection::ContentChanged),
        };

        Some(PriceChange {
            identity: identity.clone(),
            before: before.clone(),
            after: after.clone(),
            price_before,
            price_after,
            delta,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(country: &str, mnc: &str) -> PricingRecord {
        PricingRecord::new()
            .with("country", country)
            .with("operator", "Zain")
            .with("mcc", "419")
            .with("mnc", mnc)
            .with("currency", "EUR")
    }

    #[test]
    fn collisions_keep_the_last_record() {
        let engine = DiffEngine::default();
        let previous = vec![lane("Kuwait", "02").with("price", 0.03)];
        let current = vec![
            lane("Kuwait", "02").with("price", 0.05),
            lane("Kuwait", "02").with("price", 0.03),
        ];
        let result = engine.diff_records(&current, &previous);
        assert_eq!(result.unchanged_count, 1);
        assert!(result.is_empty());
    }

    #[test]
    fn decrease_is_labelled() {
        let engine = DiffEngine::default();
        let result = engine.diff_records(
            &[lane("Kuwait", "02").with("price", 0.02)],
            &[lane("Kuwait", "02").with("price", 0.03)],
        );
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].direction, ChangeDirection::Decrease);
        assert!(result.changed[0].delta.unwrap() < 0.0);
    }

    #[test]
    fn one_sided_price_is_tagged_by_side() {
        let engine = DiffEngine::default();
        let appeared = engine.diff_records(
            &[lane("Kuwait", "02").with("price", 0.02)],
            &[lane("Kuwait", "02")],
        );
        assert_eq!(appeared.changed[0].direction, ChangeDirection::PriceAppeared);
        assert_eq!(appeared.changed[0].price_before, None);
        assert_eq!(appeared.changed[0].price_after, Some(0.02));
        assert_eq!(appeared.changed[0].delta, None);

        let missing = engine.diff_records(
            &[lane("Kuwait", "02")],
            &[lane("Kuwait", "02").with("price", 0.02)],
        );
        assert_eq!(missing.changed[0].direction, ChangeDirection::PriceMissing);
        assert_eq!(missing.changed[0].price_before, Some(0.02));
    }

    #[test]
    fn priceless_records_compare_by_content() {
        let engine = DiffEngine::default();
        let same = engine.diff_records(&[lane("Kuwait", "02")], &[lane("Kuwait", "02")]);
        assert_eq!(same.unchanged_count, 1);
        assert!(same.changed.is_empty());

        let edited = engine.diff_records(
            &[lane("Kuwait", "02").with("notes", "revised")],
            &[lane("Kuwait", "02")],
        );
        assert_eq!(edited.changed.len(), 1);
        assert_eq!(edited.changed[0].direction, ChangeDirection::ContentChanged);
    }

    #[test]
    fn equal_prices_ignore_other_field_changes() {
        let engine = DiffEngine::default();
        let result = engine.diff_records(
            &[lane("Kuwait", "02").with("price", 0.03).with("effective_from", "2025-09-08")],
            &[lane("Kuwait", "02").with("price", 0.03)],
        );
        assert_eq!(result.unchanged_count, 1);
        assert!(result.is_empty());
    }

    #[test]
    fn output_follows_first_appearance_order() {
        let engine = DiffEngine::default();
        let current = vec![lane("Oman", "01"), lane("Kuwait", "02"), lane("Qatar", "03")];
        let result = engine.diff_records(&current, &[]);
        let countries: Vec<_> = result
            .new
            .iter()
            .map(|r| r.text("country").unwrap_or_default())
            .collect();
        assert_eq!(countries, ["Oman", "Kuwait", "Qatar"]);
    }

    #[test]
    fn policies_resolve_by_name() {
        assert_eq!(DiffPolicy::by_name("Fixed"), Some(DiffPolicy::fixed_fields()));
        assert_eq!(DiffPolicy::by_name("tolerant"), Some(DiffPolicy::tolerant()));
        assert_eq!(DiffPolicy::by_name("strict"), None);
        assert_eq!(DiffPolicy::fixed_fields().name(), "fixed");
    }

    #[test]
    fn fixed_fields_policy_uses_rate_first() {
        let engine = DiffEngine::new(DiffPolicy::fixed_fields());
        let result = engine.diff_records(
            &[lane("Kuwait", "02").with("rate", 0.03).with("new_price", 0.09)],
            &[lane("Kuwait", "02").with("rate", 0.03).with("new_price", 0.01)],
        );
        assert_eq!(result.unchanged_count, 1);
    }
}
