use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lookup::{first_value, has_key};
use crate::{PricingRecord, Scalar};

pub const COUNTRY_KEYS: [&str; 3] = ["country", "country_name", "countrynam"];
pub const NETWORK_KEYS: [&str; 4] = ["network", "operator", "mno", "carrier"];
pub const MCC_KEYS: [&str; 1] = ["mcc"];
pub const MNC_KEYS: [&str; 1] = ["mnc"];
pub const CURRENCY_KEYS: [&str; 2] = ["currency", "cur"];

/// Lane key used to match records across snapshots.
///
/// Only lane-defining dimensions take part; prices, variation labels and
/// dates never do. Unresolved dimensions are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub country: String,
    pub network: String,
    pub mcc: String,
    pub mnc: String,
    pub currency: String,
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.country, self.network, self.mcc, self.mnc, self.currency
        )
    }
}

/// How identity dimensions are located in a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Probe synonym lists case- and whitespace-insensitively.
    #[default]
    Synonyms,
    /// Exact `country`, `network`, `mcc`, `mnc`, `currency` keys.
    FixedFields,
}

fn norm(value: Option<&Scalar>) -> String {
    value
        .map(|v| v.as_text().trim().to_lowercase())
        .unwrap_or_default()
}

pub fn identity_of(record: &PricingRecord) -> RecordIdentity {
    identity_with_policy(record, IdentityPolicy::Synonyms)
}

pub fn identity_with_policy(record: &PricingRecord, policy: IdentityPolicy) -> RecordIdentity {
    let mut identity = match policy {
        IdentityPolicy::Synonyms => RecordIdentity {
            country: norm(first_value(record, &COUNTRY_KEYS)),
            network: norm(first_value(record, &NETWORK_KEYS)),
            mcc: norm(first_value(record, &MCC_KEYS)),
            mnc: norm(first_value(record, &MNC_KEYS)),
            currency: norm(first_value(record, &CURRENCY_KEYS)),
        },
        IdentityPolicy::FixedFields => RecordIdentity {
            country: norm(record.get("country")),
            network: norm(record.get("network")),
            mcc: norm(record.get("mcc")),
            mnc: norm(record.get("mnc")),
            currency: norm(record.get("currency")),
        },
    };

    if identity.network.is_empty() && has_key(record, "operator") {
        let operator = record
            .present()
            .find(|(key, _)| key.eq_ignore_ascii_case("operator"))
            .map(|(_, value)| value);
        identity.network = norm(operator);
    }

    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kuwait() -> PricingRecord {
        PricingRecord::new()
            .with("country", "Kuwait")
            .with("operator", "Zain")
            .with("mcc", "419")
            .with("mnc", "02")
            .with("currency", "EUR")
            .with("price", 0.03)
    }

    #[test]
    fn identity_is_normalized_and_price_independent() {
        let identity = identity_of(&kuwait());
        assert_eq!(identity.to_string(), "kuwait|zain|419|02|eur");

        let repriced = kuwait().with("price", 0.05).with("variation", "increase");
        assert_eq!(identity_of(&repriced), identity);
    }

    #[test]
    fn synonym_keys_resolve_to_same_identity() {
        let renamed = PricingRecord::new()
            .with("Country_Name", " KUWAIT ")
            .with("Carrier", "zain")
            .with("MCC", 419.0)
            .with("mnc", "02")
            .with("Cur", "eur");
        assert_eq!(identity_of(&renamed).country, "kuwait");
        assert_eq!(identity_of(&renamed), identity_of(&kuwait()));
    }

    #[test]
    fn missing_dimensions_are_empty() {
        let identity = identity_of(&PricingRecord::new());
        assert!(identity.country.is_empty() && identity.network.is_empty());
        assert_eq!(identity.to_string(), "||||");
    }

    #[test]
    fn fixed_fields_policy_ignores_synonyms_but_falls_back_to_operator() {
        let record = PricingRecord::new()
            .with("Country", "Kuwait")
            .with("operator", "Zain")
            .with("mcc", "419");
        let identity = identity_with_policy(&record, IdentityPolicy::FixedFields);
        assert_eq!(identity.country, "");
        assert_eq!(identity.network, "zain");
        assert_eq!(identity.mcc, "419");
    }
}
