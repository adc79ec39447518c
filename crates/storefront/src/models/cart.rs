//! Cart domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lux_core::{
    Address, CartId, CartStatus, CurrencyCode, OrderId, PaymentReference, ProductId, UserId,
};

/// Shipping method offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    #[default]
    Standard,
    Express,
}

impl ShippingMethod {
    /// Stable identifier used by clients and in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Express => "express",
        }
    }

    /// Resolve a client-supplied id. Unknown or missing ids select `Standard`.
    #[must_use]
    pub fn from_requested(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if id.eq_ignore_ascii_case("express") => Self::Express,
            _ => Self::Standard,
        }
    }
}

impl std::fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Weight per unit in kilograms; the rate tables supply a default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

/// Price breakdown stored on a cart and copied onto its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub currency: CurrencyCode,
}

impl CartTotals {
    /// Zeroed totals in the given currency.
    #[must_use]
    pub const fn zero(currency: CurrencyCode) -> Self {
        Self {
            subtotal: Decimal::ZERO,
            shipping: Decimal::ZERO,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
            currency,
        }
    }
}

/// A shopping cart.
#[derive(Debug, Clone)]
pub struct Cart {
    pub id: CartId,
    /// Owning user, if the cart was created by a signed-in customer.
    pub user_id: Option<UserId>,
    pub items: Vec<LineItem>,
    pub address: Option<Address>,
    pub shipping_method: Option<ShippingMethod>,
    pub totals: CartTotals,
    pub status: CartStatus,
    pub payment_reference: Option<PaymentReference>,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create an empty open cart.
    #[must_use]
    pub fn new(id: CartId, user_id: Option<UserId>, currency: CurrencyCode) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            items: Vec::new(),
            address: None,
            shipping_method: None,
            totals: CartTotals::zero(currency),
            status: CartStatus::Open,
            payment_reference: None,
            order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
