//! Shipping and tax rate tables.
//!
//! Rate tables are static configuration: built-in defaults that can be replaced
//! wholesale by a YAML file at startup (`LUX_RATE_TABLES_PATH`). They are never
//! mutated while the server runs.
//!
//! # YAML Format
//!
//! ```yaml
//! default_item_weight_kg: "5"
//! shipping:
//!   fallback:
//!     standard: { base: "40", per_kg: "6", estimated_days: "14-28" }
//!     express: { base: "80", per_kg: "9", estimated_days: "7-14" }
//!   countries:
//!     US:
//!       standard: { base: "15", per_kg: "2", estimated_days: "5-7" }
//!       express: { base: "35", per_kg: "4", estimated_days: "2-3" }
//! tax:
//!   countries: { US: "0", CA: "0.13" }
//!   regions:
//!     US: { CA: "0.0725", NY: "0.04" }
//! ```

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Cost formula for one shipping method in one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBand {
    /// Flat cost per shipment.
    pub base: Decimal,
    /// Additional cost per kilogram of total cart weight.
    pub per_kg: Decimal,
    /// Human-readable transit estimate, e.g. `5-7` business days.
    pub estimated_days: String,
}

/// The two shipping methods offered for a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingBands {
    pub standard: RateBand,
    pub express: RateBand,
}

/// Shipping rates keyed by upper-case country code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingTable {
    /// Used for any country without its own entry.
    pub fallback: ShippingBands,
    #[serde(default)]
    pub countries: HashMap<String, ShippingBands>,
}

/// Tax rates as fractions (`0.0725` = 7.25%).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxTable {
    /// Country-level rate. Unknown countries are untaxed.
    #[serde(default)]
    pub countries: HashMap<String, Decimal>,
    /// Region-level rates for countries that tax per region. When a country has
    /// a region table and the address names a region, the region rate replaces
    /// the country rate, and an unknown region is untaxed.
    #[serde(default)]
    pub regions: HashMap<String, HashMap<String, Decimal>>,
}

/// Complete pricing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTables {
    /// Weight assumed for line items that do not carry one.
    pub default_item_weight_kg: Decimal,
    pub shipping: ShippingTable,
    #[serde(default)]
    pub tax: TaxTable,
}

impl RateTables {
    /// Load the rate tables, from `path` when given, otherwise the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::RateTables` if the file cannot be read or parsed, or
    /// contains negative rates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::RateTables(shown.clone(), e.to_string()))?;
        let tables =
            Self::from_yaml(&content).map_err(|e| ConfigError::RateTables(shown.clone(), e))?;

        tracing::info!(
            path = %shown,
            countries = tables.shipping.countries.len(),
            "Loaded rate tables override"
        );
        Ok(tables)
    }

    /// Parse and validate rate tables from YAML.
    ///
    /// Country and region keys are normalized to upper case.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn from_yaml(content: &str) -> Result<Self, String> {
        let parsed: Self = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        let tables = parsed.normalized();
        tables.validate()?;
        Ok(tables)
    }

    /// Shipping bands for a country, falling back to the default band.
    #[must_use]
    pub fn shipping_for(&self, country: &str) -> &ShippingBands {
        self.shipping
            .countries
            .get(country)
            .unwrap_or(&self.shipping.fallback)
    }

    /// Tax rate for a destination.
    ///
    /// `country` and `region` must already be upper-cased.
    #[must_use]
    pub fn tax_rate_for(&self, country: &str, region: Option<&str>) -> Decimal {
        if let (Some(regions), Some(region)) = (self.tax.regions.get(country), region) {
            return regions.get(region).copied().unwrap_or(Decimal::ZERO);
        }
        self.tax
            .countries
            .get(country)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn normalized(self) -> Self {
        let upper_keys = |map: HashMap<String, Decimal>| {
            map.into_iter()
                .map(|(k, v)| (k.trim().to_ascii_uppercase(), v))
                .collect::<HashMap<_, _>>()
        };

        Self {
            default_item_weight_kg: self.default_item_weight_kg,
            shipping: ShippingTable {
                fallback: self.shipping.fallback,
                countries: self
                    .shipping
                    .countries
                    .into_iter()
                    .map(|(k, v)| (k.trim().to_ascii_uppercase(), v))
                    .collect(),
            },
            tax: TaxTable {
                countries: upper_keys(self.tax.countries),
                regions: self
                    .tax
                    .regions
                    .into_iter()
                    .map(|(k, v)| (k.trim().to_ascii_uppercase(), upper_keys(v)))
                    .collect(),
            },
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.default_item_weight_kg.is_sign_negative() {
            return Err("default_item_weight_kg must not be negative".to_string());
        }

        let bands = std::iter::once(("fallback", &self.shipping.fallback)).chain(
            self.shipping
                .countries
                .iter()
                .map(|(country, bands)| (country.as_str(), bands)),
        );
        for (country, bands) in bands {
            for band in [&bands.standard, &bands.express] {
                if band.base.is_sign_negative() || band.per_kg.is_sign_negative() {
                    return Err(format!("negative shipping rate for {country}"));
                }
            }
        }

        let rates = self
            .tax
            .countries
            .values()
            .chain(self.tax.regions.values().flat_map(HashMap::values));
        for rate in rates {
            if rate.is_sign_negative() || *rate >= Decimal::ONE {
                return Err(format!("tax rate {rate} must be in [0, 1)"));
            }
        }

        Ok(())
    }
}

impl Default for RateTables {
    fn default() -> Self {
        Self {
            default_item_weight_kg: Decimal::from(5),
            shipping: default_shipping(),
            tax: default_tax(),
        }
    }
}

// =============================================================================
// Built-in tables
// =============================================================================

fn band(base: i64, per_kg: (i64, u32), estimated_days: &str) -> RateBand {
    RateBand {
        base: Decimal::from(base),
        per_kg: Decimal::new(per_kg.0, per_kg.1),
        estimated_days: estimated_days.to_string(),
    }
}

fn bands(standard: RateBand, express: RateBand) -> ShippingBands {
    ShippingBands { standard, express }
}

fn default_shipping() -> ShippingTable {
    let europe = || bands(band(30, (4, 0), "10-14"), band(60, (7, 0), "5-7"));
    let east_asia = || bands(band(35, (5, 0), "14-21"), band(70, (8, 0), "7-10"));

    let countries = [
        ("US", bands(band(15, (2, 0), "5-7"), band(35, (4, 0), "2-3"))),
        ("CA", bands(band(20, (3, 0), "7-10"), band(45, (5, 0), "3-5"))),
        ("MX", bands(band(25, (35, 1), "7-14"), band(50, (6, 0), "4-7"))),
        ("GB", europe()),
        ("FR", europe()),
        ("DE", europe()),
        ("ES", europe()),
        ("IT", europe()),
        ("CN", east_asia()),
        ("JP", east_asia()),
        ("AU", bands(band(40, (6, 0), "14-21"), band(80, (9, 0), "7-10"))),
    ];

    ShippingTable {
        fallback: bands(band(40, (6, 0), "14-28"), band(80, (9, 0), "7-14")),
        countries: countries
            .into_iter()
            .map(|(code, b)| (code.to_string(), b))
            .collect(),
    }
}

/// (code, mantissa, scale)
const COUNTRY_TAX: &[(&str, i64, u32)] = &[
    ("US", 0, 0),
    ("CA", 13, 2),
    ("MX", 16, 2),
    ("GB", 20, 2),
    ("FR", 20, 2),
    ("DE", 19, 2),
    ("ES", 21, 2),
    ("IT", 22, 2),
    ("CN", 13, 2),
    ("JP", 10, 2),
    ("AU", 10, 2),
];

const US_STATE_TAX: &[(&str, i64, u32)] = &[
    ("AL", 4, 2),
    ("AK", 0, 0),
    ("AZ", 56, 3),
    ("AR", 65, 3),
    ("CA", 725, 4),
    ("CO", 29, 3),
    ("CT", 635, 4),
    ("DE", 0, 0),
    ("FL", 6, 2),
    ("GA", 4, 2),
    ("HI", 4, 2),
    ("ID", 6, 2),
    ("IL", 625, 4),
    ("IN", 7, 2),
    ("IA", 6, 2),
    ("KS", 65, 3),
    ("KY", 6, 2),
    ("LA", 445, 4),
    ("ME", 55, 3),
    ("MD", 6, 2),
    ("MA", 625, 4),
    ("MI", 6, 2),
    ("MN", 6875, 5),
    ("MS", 7, 2),
    ("MO", 4225, 5),
    ("MT", 0, 0),
    ("NE", 55, 3),
    ("NV", 685, 4),
    ("NH", 0, 0),
    ("NJ", 6625, 5),
    ("NM", 5125, 5),
    ("NY", 4, 2),
    ("NC", 475, 4),
    ("ND", 5, 2),
    ("OH", 575, 4),
    ("OK", 45, 3),
    ("OR", 0, 0),
    ("PA", 6, 2),
    ("RI", 7, 2),
    ("SC", 6, 2),
    ("SD", 45, 3),
    ("TN", 7, 2),
    ("TX", 625, 4),
    ("UT", 595, 4),
    ("VT", 6, 2),
    ("VA", 53, 3),
    ("WA", 65, 3),
    ("WV", 6, 2),
    ("WI", 5, 2),
    ("WY", 4, 2),
    ("DC", 6, 2),
];

fn rate_map(rows: &[(&str, i64, u32)]) -> HashMap<String, Decimal> {
    rows.iter()
        .map(|&(code, mantissa, scale)| (code.to_string(), Decimal::new(mantissa, scale)))
        .collect()
}

fn default_tax() -> TaxTable {
    TaxTable {
        countries: rate_map(COUNTRY_TAX),
        regions: HashMap::from([("US".to_string(), rate_map(US_STATE_TAX))]),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_us_region_overrides_country_rate() {
        let tables = RateTables::default();
        assert_eq!(tables.tax_rate_for("US", Some("CA")), dec("0.0725"));
        assert_eq!(tables.tax_rate_for("US", Some("MN")), dec("0.06875"));
        assert_eq!(tables.tax_rate_for("US", None), Decimal::ZERO);
    }

    #[test]
    fn test_unknown_us_region_is_untaxed() {
        let tables = RateTables::default();
        assert_eq!(tables.tax_rate_for("US", Some("ZZ")), Decimal::ZERO);
    }

    #[test]
    fn test_non_us_ignores_region() {
        let tables = RateTables::default();
        assert_eq!(tables.tax_rate_for("CA", Some("ON")), dec("0.13"));
        assert_eq!(tables.tax_rate_for("DE", Some("BY")), dec("0.19"));
    }

    #[test]
    fn test_unknown_country_is_untaxed_and_uses_fallback_shipping() {
        let tables = RateTables::default();
        assert_eq!(tables.tax_rate_for("BR", None), Decimal::ZERO);
        let bands = tables.shipping_for("BR");
        assert_eq!(bands.standard.base, dec("40"));
        assert_eq!(bands.standard.estimated_days, "14-28");
        assert_eq!(bands.express.per_kg, dec("9"));
    }

    #[test]
    fn test_mexico_standard_per_kg_is_fractional() {
        let tables = RateTables::default();
        assert_eq!(tables.shipping_for("MX").standard.per_kg, dec("3.5"));
    }

    #[test]
    fn test_yaml_override_normalizes_keys() {
        let yaml = r#"
default_item_weight_kg: "2"
shipping:
  fallback:
    standard: { base: "10", per_kg: "1", estimated_days: "3-5" }
    express: { base: "20", per_kg: "2", estimated_days: "1-2" }
  countries:
    nz:
      standard: { base: "12", per_kg: "1.5", estimated_days: "4-6" }
      express: { base: "25", per_kg: "2.5", estimated_days: "2-3" }
tax:
  countries: { nz: "0.15" }
"#;
        let tables = RateTables::from_yaml(yaml).unwrap();
        assert_eq!(tables.default_item_weight_kg, dec("2"));
        assert_eq!(tables.shipping_for("NZ").standard.per_kg, dec("1.5"));
        assert_eq!(tables.tax_rate_for("NZ", Some("AUK")), dec("0.15"));
        assert!(tables.tax.regions.is_empty());
    }

    #[test]
    fn test_yaml_rejects_out_of_range_tax() {
        let yaml = r#"
default_item_weight_kg: "5"
shipping:
  fallback:
    standard: { base: "10", per_kg: "1", estimated_days: "3-5" }
    express: { base: "20", per_kg: "2", estimated_days: "1-2" }
tax:
  countries: { US: "1.5" }
"#;
        assert!(RateTables::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let tables = RateTables::load(None).unwrap();
        assert_eq!(tables, RateTables::default());
    }

    #[test]
    fn test_load_reads_file_and_names_missing_path() {
        let path = std::env::temp_dir().join(format!("lux-rates-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            r#"
default_item_weight_kg: "3"
shipping:
  fallback:
    standard: { base: "10", per_kg: "1", estimated_days: "3-5" }
    express: { base: "20", per_kg: "2", estimated_days: "1-2" }
"#,
        )
        .unwrap();

        let tables = RateTables::load(Some(&path)).unwrap();
        assert_eq!(tables.default_item_weight_kg, dec("3"));
        std::fs::remove_file(&path).unwrap();

        let missing = RateTables::load(Some(&path)).unwrap_err();
        assert!(
            matches!(&missing, ConfigError::RateTables(shown, _) if shown.contains("lux-rates-")),
            "{missing:?}"
        );
    }
}
