//! Tolerant field access across supplier-specific column names.
//!
//! Candidates are probed in priority order, first against case-folded keys,
//! then against keys with all whitespace removed (so `" MCC "` matches `mcc`).
//! Absent values are skipped.

use crate::PricingRecord;
use crate::Scalar;

fn fold(key: &str) -> String {
    key.to_lowercase()
}

fn squash(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Every present value whose key matches one of `candidates`, best match first.
pub fn resolve_all<'r>(
    record: &'r PricingRecord,
    candidates: &'r [&'r str],
) -> impl Iterator<Item = &'r Scalar> + 'r {
    let folded = candidates.iter().flat_map(move |candidate| {
        let wanted = fold(candidate);
        record
            .present()
            .filter(move |(key, _)| fold(key) == wanted)
    });
    let squashed = candidates.iter().flat_map(move |candidate| {
        let wanted = squash(candidate);
        record
            .present()
            .filter(move |(key, _)| squash(key) == wanted)
    });
    folded.chain(squashed).map(|(_, value)| value)
}

pub fn first_value<'r>(record: &'r PricingRecord, candidates: &'r [&'r str]) -> Option<&'r Scalar> {
    resolve_all(record, candidates).next()
}

/// Case-insensitive check for a key, regardless of its value.
pub fn has_key(record: &PricingRecord, name: &str) -> bool {
    record.keys().any(|key| key.eq_ignore_ascii_case(name))
}
