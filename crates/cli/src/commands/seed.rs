//! Seed stock levels and carts from a YAML file.
//!
//! Used to prepare a local or staging database for checkout runs. Stock rows
//! are overwritten; carts are written as open carts with no totals, so the
//! first `reprice` call prices them.
//!
//! # File Format
//!
//! ```yaml
//! products:
//!   - id: antminer-s21
//!     stock: 12
//! carts:
//!   - id: demo-cart
//!     userId: u-demo
//!     currency: USD
//!     address: { country: US, region: CA }
//!     items:
//!       - productId: antminer-s21
//!         quantity: 1
//!         unitPrice: "5499.00"
//!         weightKg: "15.4"
//! ```

use std::collections::HashSet;
use std::path::Path;

use lux_core::{Address, CartId, CurrencyCode, ProductId, UserId};
use lux_storefront::db::Stores;
use lux_storefront::models::{Cart, LineItem};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use super::connect;

/// Top-level seed document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    products: Vec<SeedProduct>,
    carts: Vec<SeedCart>,
}

#[derive(Debug, Deserialize)]
struct SeedProduct {
    id: String,
    stock: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedCart {
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    items: Vec<LineItem>,
}

/// Check a parsed seed file, returning one message per problem.
fn validate(seed: &SeedFile) -> Vec<String> {
    let mut errors = Vec::new();

    let mut product_ids = HashSet::new();
    for product in &seed.products {
        if product.id.trim().is_empty() {
            errors.push("product with empty id".to_string());
        } else if !product_ids.insert(product.id.as_str()) {
            errors.push(format!("product {} listed twice", product.id));
        }
        if product.stock < 0 {
            errors.push(format!("product {}: stock must not be negative", product.id));
        }
    }

    let mut cart_ids = HashSet::new();
    for cart in &seed.carts {
        if cart.id.trim().is_empty() {
            errors.push("cart with empty id".to_string());
        } else if !cart_ids.insert(cart.id.as_str()) {
            errors.push(format!("cart {} listed twice", cart.id));
        }
        if let Some(currency) = &cart.currency
            && let Err(e) = currency.parse::<CurrencyCode>()
        {
            errors.push(format!("cart {}: {e}", cart.id));
        }
        for item in &cart.items {
            if item.quantity == 0 {
                errors.push(format!("cart {}: {} has zero quantity", cart.id, item.product_id));
            }
            if item.unit_price < Decimal::ZERO {
                errors.push(format!("cart {}: {} has a negative price", cart.id, item.product_id));
            }
        }
    }

    errors
}

impl SeedCart {
    fn into_cart(self) -> Cart {
        let currency = self
            .currency
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or_default();
        let mut cart = Cart::new(CartId::new(self.id), self.user_id.map(UserId::new), currency);
        cart.items = self.items;
        cart.address = self.address;
        cart
    }
}

/// Seed stock levels and carts from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation, or if
/// a database write fails.
pub async fn run(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    // Verify file exists
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading seed data from file");

    // Read and validate YAML before connecting to database
    let content = tokio::fs::read_to_string(path).await?;
    let seed: SeedFile = serde_yaml::from_str(&content)?;

    info!(
        products = seed.products.len(),
        carts = seed.carts.len(),
        "Parsed seed file"
    );

    let errors = validate(&seed);
    if !errors.is_empty() {
        error!("Seed validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    let pool = connect().await?;
    let stores = Stores::postgres(&pool);

    for product in &seed.products {
        stores
            .inventory
            .set_stock(&ProductId::new(product.id.as_str()), product.stock)
            .await?;
    }
    info!(count = seed.products.len(), "Stock levels written");

    let cart_count = seed.carts.len();
    for cart in seed.carts {
        stores.carts.put(&cart.into_cart()).await?;
    }
    info!(count = cart_count, "Carts written");

    info!("Seeding complete");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../../seed/demo.yaml");

    #[test]
    fn test_demo_seed_is_valid() {
        let seed: SeedFile = serde_yaml::from_str(DEMO).unwrap();
        assert!(!seed.products.is_empty());
        assert!(validate(&seed).is_empty());
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let seed: SeedFile = serde_yaml::from_str(
            r#"
products:
  - { id: rig, stock: -1 }
  - { id: rig, stock: 3 }
carts:
  - id: c1
    currency: JPY
    items:
      - { productId: rig, quantity: 0, unitPrice: "10.00" }
"#,
        )
        .unwrap();

        let errors = validate(&seed);
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("listed twice")));
        assert!(errors.iter().any(|e| e.contains("negative")));
        assert!(errors.iter().any(|e| e.contains("JPY")));
        assert!(errors.iter().any(|e| e.contains("zero quantity")));
    }

    #[test]
    fn test_seed_cart_defaults_to_open_usd() {
        let cart = SeedCart {
            id: "c1".to_string(),
            user_id: Some("u1".to_string()),
            currency: None,
            address: None,
            items: Vec::new(),
        }
        .into_cart();

        assert_eq!(cart.totals.currency, CurrencyCode::USD);
        assert_eq!(cart.user_id, Some(UserId::new("u1")));
        assert!(cart.is_empty());
    }
}
