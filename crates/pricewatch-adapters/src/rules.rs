//! Deterministic label-matching extractor for supplier price notices.
//!
//! Text is split into blank-line separated blocks and each block carrying a
//! price label followed by a number becomes one record.

use std::sync::OnceLock;

use async_trait::async_trait;
use pricewatch_core::normalize::canonical_variation;
use pricewatch_core::{normalize_record, PricingRecord, Scalar, RECOGNIZED_FIELDS};
use regex::{Captures, Regex};

use crate::{parse_captured_number, ExtractionError, RecordExtractor};

const CANONICAL_VARIATIONS: [&str; 4] = ["increase", "decrease", "unchanged", "new"];

struct Patterns {
    country: Regex,
    operator: Regex,
    mcc: Regex,
    mnc: Regex,
    currency: Regex,
    old_price: Regex,
    new_price: Regex,
    solo_price: Regex,
    rate_qualifier: Regex,
    change_label: Regex,
    variation: Regex,
    date: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Failed to compile extractor regex")
}

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        country: compile(r"(?i)\bcountry(?:\s*iso)?\s*[:=]\s*([a-z ()/&'-]+)"),
        operator: compile(r"(?i)\b(?:operator|network)\s*[:=]\s*([a-z0-9 ()/&'._-]+)"),
        mcc: compile(r"(?i)\bmcc[^0-9]{0,5}([0-9]{2,4})\b"),
        mnc: compile(r"(?i)\bmnc[^0-9]{0,5}([0-9]{1,4})\b"),
        currency: compile(r"(?i)\b(eur|usd|sek|gbp)\b"),
        old_price: compile(
            r"(?i)\b(old price|previous rate|old rate|current rate)\b[^0-9]{0,10}([0-9][0-9.,]*)",
        ),
        new_price: compile(r"(?i)\b(new price|rate)\b[^0-9]{0,10}([0-9][0-9.,]*)"),
        solo_price: compile(r"(?i)\b(rate|price)\b[^0-9]{0,10}([0-9][0-9.,]*)"),
        rate_qualifier: compile(r"(?i)\b(?:old|previous|current)\s*$"),
        change_label: compile(r"(?i)\b(?:change|variation)\s*[:=]\s*(no\s+change|[a-z]+)"),
        variation: compile(r"(?i)\b(increase|decrease|unchanged|up|down|new)\b"),
        date: compile(
            r"\b(20[0-9]{2}[-/][0-9]{2}[-/][0-9]{2}(?:[ T][0-9]{2}:[0-9]{2}(?::[0-9]{2})?)?)\b",
        ),
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedExtractor;

#[async_trait]
impl RecordExtractor for RuleBasedExtractor {
    fn name(&self) -> &'static str {
        "rule-based"
    }

    async fn extract(
        &self,
        text: &str,
        provider_hint: Option<&str>,
    ) -> Result<Vec<PricingRecord>, ExtractionError> {
        Ok(extract_blocks(text, provider_hint))
    }
}

pub fn extract_blocks(text: &str, provider_hint: Option<&str>) -> Vec<PricingRecord> {
    split_blocks(text)
        .iter()
        .filter_map(|block| extract_block(block, provider_hint))
        .collect()
}

fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

fn extract_block(block: &str, provider_hint: Option<&str>) -> Option<PricingRecord> {
    let p = patterns();

    let old = first_price(&p.old_price, block, |_| true);
    let new = first_price(&p.new_price, block, |caps| !is_qualified_rate(block, caps))
        .or_else(|| first_price(&p.solo_price, block, |_| true));
    if old.is_none() && new.is_none() {
        return None;
    }

    let country = first_capture(&p.country, block);
    let operator = first_capture(&p.operator, block);
    let mcc = first_capture(&p.mcc, block);
    let mnc = first_capture(&p.mnc, block);
    let currency = first_capture(&p.currency, block).map(|code| code.to_ascii_uppercase());
    let variation = find_variation(block);
    let effective_from = first_capture(&p.date, block).map(|d| d.replace('/', "-"));

    let mut record = PricingRecord::new();
    for field in RECOGNIZED_FIELDS {
        record.insert(field, None);
    }
    let mut set = |key: &str, value: Option<Scalar>| record.insert(key, value);
    set("provider", provider_hint.map(Scalar::from));
    set("country", country.map(Scalar::from));
    set("operator", operator.map(Scalar::from));
    set("mcc", mcc.map(Scalar::from));
    set("mnc", mnc.map(Scalar::from));
    set("previous_rate", old.map(Scalar::Number));
    set("old_price", old.map(Scalar::Number));
    set("new_price", new.map(Scalar::Number));
    set("price", if old.is_none() { new.map(Scalar::Number) } else { None });
    set("currency", currency.map(Scalar::from));
    set("variation", variation.map(Scalar::from));
    set("effective_from", effective_from.map(Scalar::from));

    Some(normalize_record(record))
}

/// Trimmed first group of the first match with a non-empty capture.
fn first_capture(re: &Regex, block: &str) -> Option<String> {
    re.captures_iter(block)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Number in group 2 of the first accepted match that parses.
fn first_price(re: &Regex, block: &str, accept: impl Fn(&Captures<'_>) -> bool) -> Option<f64> {
    re.captures_iter(block)
        .filter(|caps| accept(caps))
        .find_map(|caps| parse_captured_number(caps.get(2)?.as_str()))
}

/// `rate` preceded by `old`, `previous` or `current` belongs to the old price.
fn is_qualified_rate(block: &str, caps: &Captures<'_>) -> bool {
    let Some(label) = caps.get(1) else {
        return false;
    };
    label.as_str().eq_ignore_ascii_case("rate")
        && patterns().rate_qualifier.is_match(&block[..label.start()])
}

/// An explicit `Change:` label wins when it names a known direction;
/// otherwise the first direction keyword in the block, skipping `new` used
/// as part of a `new price`/`new rate` label.
fn find_variation(block: &str) -> Option<String> {
    let p = patterns();
    let labelled = p
        .change_label
        .captures_iter(block)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let words: Vec<_> = m.as_str().split_whitespace().collect();
            canonical_variation(&words.join(" "))
        })
        .find(|label| CANONICAL_VARIATIONS.contains(&label.as_str()));
    if labelled.is_some() {
        return labelled;
    }
    p.variation
        .find_iter(block)
        .find(|m| {
            let next = block[m.end()..].trim_start();
            let labels_price =
                starts_with_ignore_case(next, "price") || starts_with_ignore_case(next, "rate");
            !(m.as_str().eq_ignore_ascii_case("new") && labels_price)
        })
        .map(|m| canonical_variation(m.as_str()))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUWAIT_NOTICE: &str = "
    Country: Kuwait
    Operator: zain
    MCC 419, MNC 02
    Old Price 0.0300 EUR
    New Price 0.0305 EUR
    Effective Date 2025-09-08
    Change: Increase
    ";

    #[tokio::test]
    async fn extracts_the_sample_notice() {
        let rows = RuleBasedExtractor
            .extract(KUWAIT_NOTICE, Some("Demo"))
            .await
            .expect("extract");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.text("country").as_deref(), Some("Kuwait"));
        assert_eq!(row.text("operator").as_deref(), Some("zain"));
        assert_eq!(row.text("mcc").as_deref(), Some("419"));
        assert_eq!(row.text("mnc").as_deref(), Some("02"));
        assert_eq!(row.get("old_price"), Some(&Scalar::Number(0.03)));
        assert_eq!(row.get("previous_rate"), Some(&Scalar::Number(0.03)));
        assert_eq!(row.get("new_price"), Some(&Scalar::Number(0.0305)));
        assert_eq!(row.get("price"), None);
        assert_eq!(row.text("currency").as_deref(), Some("EUR"));
        assert_eq!(row.text("variation").as_deref(), Some("increase"));
        assert_eq!(row.text("effective_from").as_deref(), Some("2025-09-08"));
        assert_eq!(row.text("provider").as_deref(), Some("Demo"));
    }

    #[test]
    fn solo_rate_becomes_price() {
        let rows = extract_blocks("Country: Testland\nRate 0.12 EUR\n", None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("price"), Some(&Scalar::Number(0.12)));
        assert_eq!(rows[0].get("new_price"), Some(&Scalar::Number(0.12)));
        assert_eq!(rows[0].get("old_price"), None);
        assert_eq!(rows[0].get("provider"), None);
    }

    #[test]
    fn one_record_per_priced_block() {
        let text = "Hello team,\n\nCountry: Oman\nMCC 422 MNC 02\nPrice: 0,021 USD\n\n\
                    Country: Qatar\nMCC 427 MNC 01\nOld rate 0.03 New price 0.04 USD\n\nRegards";
        let rows = extract_blocks(text, Some("acme"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("country").as_deref(), Some("Oman"));
        assert_eq!(rows[0].get("price"), Some(&Scalar::Number(0.021)));
        assert_eq!(rows[1].text("mcc").as_deref(), Some("427"));
        assert_eq!(rows[1].get("old_price"), Some(&Scalar::Number(0.03)));
        assert_eq!(rows[1].get("new_price"), Some(&Scalar::Number(0.04)));
    }

    #[test]
    fn blocks_without_prices_are_ignored() {
        assert!(extract_blocks("Dear customer,\n\nplease see attached.\n", None).is_empty());
        assert!(extract_blocks("", None).is_empty());
    }

    #[test]
    fn oversized_codes_are_rejected() {
        let rows = extract_blocks("MCC 41901 MNC 02\nRate 0.1", None);
        assert_eq!(rows[0].get("mcc"), None);
        assert_eq!(rows[0].text("mnc").as_deref(), Some("02"));
    }

    #[test]
    fn dates_accept_slashes_and_times() {
        let date = |text: &str| {
            extract_blocks(&format!("Rate 0.1\n{text}"), None)[0].text("effective_from")
        };
        assert_eq!(date("valid from 2025/09/08").as_deref(), Some("2025-09-08"));
        assert_eq!(
            date("from 2025-09-08 12:30:00 UTC").as_deref(),
            Some("2025-09-08 12:30:00")
        );
        assert_eq!(date("ref 120250908"), None);
    }

    #[test]
    fn change_label_keeps_only_the_direction() {
        let rows = extract_blocks(
            "Country: Kuwait\nChange: Increase effective 2025-09-08\nRate 0.1 EUR",
            None,
        );
        assert_eq!(rows[0].text("variation").as_deref(), Some("increase"));
        assert_eq!(rows[0].text("effective_from").as_deref(), Some("2025-09-08"));

        let rows = extract_blocks("Variation: no change\nRate 0.1", None);
        assert_eq!(rows[0].text("variation").as_deref(), Some("unchanged"));
    }

    #[test]
    fn unknown_change_label_falls_back_to_keywords() {
        let rows = extract_blocks("Change: see below\nPrices go down\nRate 0.1", None);
        assert_eq!(rows[0].text("variation").as_deref(), Some("decrease"));
    }

    #[test]
    fn labels_match_in_any_case() {
        let rows = extract_blocks("COUNTRY ISO = Oman\nOLD RATE 0.02 new PRICE 0.03 usd", None);
        assert_eq!(rows[0].text("country").as_deref(), Some("Oman"));
        assert_eq!(rows[0].get("old_price"), Some(&Scalar::Number(0.02)));
        assert_eq!(rows[0].get("new_price"), Some(&Scalar::Number(0.03)));
        assert_eq!(rows[0].text("currency").as_deref(), Some("USD"));
    }

    #[test]
    fn new_before_price_is_not_a_variation() {
        let rows = extract_blocks("Network: Zain\nNew Price 0.05\nDown from last month", None);
        assert_eq!(rows[0].text("variation").as_deref(), Some("decrease"));
        assert_eq!(rows[0].text("operator").as_deref(), Some("Zain"));
    }
}
