//! Decimal money helpers.
//!
//! All checkout arithmetic is done in `rust_decimal::Decimal`. Amounts are kept in
//! the currency's standard unit (dollars, not cents) and rounded half-up to two
//! places at every stage boundary. Conversion to integer minor units happens only
//! at the gateway edge.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors converting between decimal amounts and minor units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// The amount does not fit into an `i64` count of minor units.
    #[error("amount {0} is out of range for minor units")]
    OutOfRange(Decimal),
    /// Unknown currency code.
    #[error("unsupported currency code: {0}")]
    UnsupportedCurrency(String),
}

/// Round to two decimal places, half away from zero.
///
/// For the non-negative amounts checkout deals in this is the familiar
/// "half-up" rounding: `17.0375` becomes `17.04`.
#[must_use]
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a standard-unit amount into integer minor units (cents).
///
/// # Errors
///
/// Returns `MoneyError::OutOfRange` if the result does not fit into an `i64`.
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(MoneyError::OutOfRange(amount))
}

/// Convert integer minor units (cents) back into a standard-unit amount.
#[must_use]
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// ISO 4217 currency codes accepted at checkout.
///
/// Settlement is single-currency per cart; this only names the cart's currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    MXN,
}

impl CurrencyCode {
    /// Upper-case ISO code, as stored and shown to clients.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
            Self::MXN => "MXN",
        }
    }

    /// Lower-case code, as the payment gateway expects it.
    #[must_use]
    pub fn gateway_code(self) -> String {
        self.code().to_ascii_lowercase()
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            "MXN" => Ok(Self::MXN),
            other => Err(MoneyError::UnsupportedCurrency(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_round2_half_up() {
        assert_eq!(round2(Decimal::from_str("17.0375").unwrap()), Decimal::from_str("17.04").unwrap());
        assert_eq!(round2(Decimal::from_str("0.005").unwrap()), Decimal::from_str("0.01").unwrap());
        assert_eq!(round2(Decimal::from_str("0.004").unwrap()), Decimal::from_str("0.00").unwrap());
        assert_eq!(round2(Decimal::from_str("2.675").unwrap()), Decimal::from_str("2.68").unwrap());
    }

    #[test]
    fn test_minor_units_round_trip() {
        let amount = Decimal::from_str("252.04").unwrap();
        assert_eq!(to_minor_units(amount).unwrap(), 25_204);
        assert_eq!(from_minor_units(25_204), amount);
    }

    #[test]
    fn test_minor_units_rounds_fractional_cents() {
        assert_eq!(to_minor_units(Decimal::from_str("10.005").unwrap()).unwrap(), 1001);
    }

    #[test]
    fn test_currency_parse_is_case_insensitive() {
        assert_eq!(CurrencyCode::from_str("usd").unwrap(), CurrencyCode::USD);
        assert_eq!(CurrencyCode::USD.gateway_code(), "usd");
        assert!(CurrencyCode::from_str("XYZ").is_err());
    }
}
