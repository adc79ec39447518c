//! Cart pricing: shipping options, tax and totals for a destination.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument};

use lux_core::{Address, CartId, CurrencyCode, round2};

use crate::db::CartStore;
use crate::error::{AppError, add_breadcrumb};
use crate::models::{CartTotals, LineItem, ShippingMethod};
use crate::rates::{RateBand, RateTables};

/// A priced shipping option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingQuote {
    pub id: ShippingMethod,
    pub name: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub currency: CurrencyCode,
    pub estimated_days: String,
}

/// Result of pricing a cart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repriced {
    /// Always `standard` then `express`.
    pub shipping_methods: Vec<ShippingQuote>,
    pub totals: CartTotals,
    #[serde(skip)]
    pub selected: ShippingMethod,
}

/// Total shipping weight; lines without a weight use the table default.
#[must_use]
pub fn total_weight(items: &[LineItem], default_weight_kg: Decimal) -> Decimal {
    items
        .iter()
        .map(|item| item.weight_kg.unwrap_or(default_weight_kg) * Decimal::from(item.quantity))
        .sum()
}

#[must_use]
pub fn subtotal(items: &[LineItem]) -> Decimal {
    round2(
        items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum(),
    )
}

fn quote(
    method: ShippingMethod,
    band: &RateBand,
    weight: Decimal,
    currency: CurrencyCode,
) -> ShippingQuote {
    let (name, description) = match method {
        ShippingMethod::Standard => (
            "Standard Shipping",
            format!("Delivery in {} business days", band.estimated_days),
        ),
        ShippingMethod::Express => (
            "Express Shipping",
            format!("Fast delivery in {} business days", band.estimated_days),
        ),
    };

    ShippingQuote {
        id: method,
        name: name.to_string(),
        description,
        cost: round2(band.base + band.per_kg * weight),
        currency,
        estimated_days: band.estimated_days.clone(),
    }
}

/// Price `items` for `address`. Pure; no store access.
#[must_use]
pub fn price(
    tables: &RateTables,
    items: &[LineItem],
    discount: Decimal,
    currency: CurrencyCode,
    address: &Address,
    requested: Option<&str>,
) -> Repriced {
    let country = address.country_code();
    let weight = total_weight(items, tables.default_item_weight_kg);
    let bands = tables.shipping_for(&country);

    let shipping_methods = vec![
        quote(ShippingMethod::Standard, &bands.standard, weight, currency),
        quote(ShippingMethod::Express, &bands.express, weight, currency),
    ];

    let selected = ShippingMethod::from_requested(requested);
    let shipping = shipping_methods
        .iter()
        .find(|q| q.id == selected)
        .map_or(Decimal::ZERO, |q| q.cost);

    let subtotal = subtotal(items);
    let rate = tables.tax_rate_for(&country, address.region_code().as_deref());
    let tax = round2((subtotal + shipping) * rate);
    let total = round2(subtotal + shipping + tax - discount);

    Repriced {
        shipping_methods,
        totals: CartTotals {
            subtotal,
            shipping,
            tax,
            discount,
            total,
            currency,
        },
        selected,
    }
}

/// Service that reprices carts and stores the result.
pub struct PricingEngine {
    carts: Arc<dyn CartStore>,
    tables: Arc<RateTables>,
}

impl PricingEngine {
    #[must_use]
    pub fn new(carts: Arc<dyn CartStore>, tables: Arc<RateTables>) -> Self {
        Self { carts, tables }
    }

    /// Price a cart for a destination and persist totals, method and address.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a blank cart id, a missing address or country,
    ///   or an empty cart
    /// - `NotFound` for an unknown cart
    /// - `Database` if the store fails
    #[instrument(skip(self, address), fields(cart_id = %cart_id))]
    pub async fn reprice(
        &self,
        cart_id: &CartId,
        address: Option<&Address>,
        shipping_method_id: Option<&str>,
    ) -> Result<Repriced, AppError> {
        if cart_id.is_blank() {
            return Err(AppError::InvalidArgument("cartId is required".to_string()));
        }

        let address = address
            .filter(|a| !a.is_missing_country())
            .ok_or_else(|| {
                AppError::InvalidArgument("address with country is required".to_string())
            })?;

        let cart = self
            .carts
            .get(cart_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Cart not found".to_string()))?;

        if cart.is_empty() {
            return Err(AppError::InvalidArgument("Cart is empty".to_string()));
        }

        let repriced = price(
            &self.tables,
            &cart.items,
            cart.totals.discount,
            cart.totals.currency,
            address,
            shipping_method_id,
        );

        debug!(
            country = %address.country_code(),
            region = ?address.region_code(),
            tax = %repriced.totals.tax,
            "Tax computed"
        );

        self.carts
            .save_pricing(cart_id, address, repriced.selected, &repriced.totals)
            .await?;

        info!(
            method = %repriced.selected,
            total = %repriced.totals.total,
            "Cart repriced"
        );
        add_breadcrumb("checkout", "Cart repriced", Some(&[("cart_id", cart_id.as_str())]));

        Ok(repriced)
    }
}
