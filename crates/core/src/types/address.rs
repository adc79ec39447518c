//! Destination address for a cart.

use serde::{Deserialize, Serialize};

/// Shipping destination.
///
/// Only `country` and `region` affect pricing; the remaining fields are carried
/// through to the payment gateway and the order snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// ISO 3166-1 alpha-2 country code.
    #[serde(default)]
    pub country: String,
    /// Region / state code, e.g. `CA` for California.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "state")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "zip")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Address {
    /// Upper-cased, trimmed country code.
    #[must_use]
    pub fn country_code(&self) -> String {
        self.country.trim().to_ascii_uppercase()
    }

    /// Upper-cased, trimmed region code, if one is present and non-empty.
    #[must_use]
    pub fn region_code(&self) -> Option<String> {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_ascii_uppercase)
    }

    /// True when no country was supplied.
    #[must_use]
    pub fn is_missing_country(&self) -> bool {
        self.country.trim().is_empty()
    }
}
