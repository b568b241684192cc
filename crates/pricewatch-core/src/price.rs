use crate::lookup::resolve_all;
use crate::normalize::coerce_number;
use crate::PricingRecord;

/// Current prices are preferred over historical ones.
pub const PRICE_PRIORITY: [&str; 6] = [
    "new_price",
    "price",
    "rate",
    "current_rate",
    "previous_rate",
    "old_price",
];

/// Priority used by the fixed-fields diff policy.
pub const FIXED_FIELDS_PRICE_PRIORITY: [&str; 4] = ["rate", "price", "new_rate", "new_price"];

pub fn price_of(record: &PricingRecord) -> Option<f64> {
    price_with_priority(record, &PRICE_PRIORITY)
}

/// First value in `priority` order that is, or coerces to, a number.
pub fn price_with_priority(record: &PricingRecord, priority: &[&str]) -> Option<f64> {
    resolve_all(record, priority).find_map(coerce_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_price_beats_historical_fields() {
        let record = PricingRecord::new()
            .with("old_price", 0.03)
            .with("previous_rate", 0.03)
            .with("new_price", 0.0305);
        assert_eq!(price_of(&record), Some(0.0305));
    }

    #[test]
    fn falls_through_non_numeric_candidates() {
        let record = PricingRecord::new()
            .with("new_price", "tbd")
            .with("Rate", "0,12 EUR")
            .with("old_price", 0.1);
        assert_eq!(price_of(&record), Some(0.12));
    }

    #[test]
    fn historical_price_is_used_when_nothing_current() {
        let record = PricingRecord::new().with("old_price", 0.2);
        assert_eq!(price_of(&record), Some(0.2));
    }

    #[test]
    fn no_price_fields_is_absent() {
        let record = PricingRecord::new().with("country", "Kuwait").with("cost", 1.0);
        assert_eq!(price_of(&record), None);
    }

    #[test]
    fn alternate_priority_prefers_rate() {
        let record = PricingRecord::new().with("rate", 0.5).with("new_price", 0.7);
        assert_eq!(
            price_with_priority(&record, &FIXED_FIELDS_PRICE_PRIORITY),
            Some(0.5)
        );
        assert_eq!(price_of(&record), Some(0.7));
    }
}
