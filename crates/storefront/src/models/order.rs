//! Order types and order number generation.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;

use lux_core::{
    Address, CartId, OrderId, OrderStatus, PaymentReference, UserId, WebhookLogId,
};

use super::cart::{CartTotals, LineItem, ShippingMethod};

/// Lowest and highest random order number suffix (inclusive).
const SUFFIX_RANGE: std::ops::RangeInclusive<u16> = 1000..=9999;

/// Human-facing order number, `<PREFIX>-YYYYMMDD-NNNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Generate an order number for `date` with a random four digit suffix.
    ///
    /// Not unique on its own: the order store rejects duplicates and the caller
    /// draws again.
    #[must_use]
    pub fn generate(prefix: &str, date: NaiveDate, rng: &mut impl Rng) -> Self {
        let suffix = rng.random_range(SUFFIX_RANGE);
        Self(format!("{prefix}-{}-{suffix}", date.format("%Y%m%d")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OrderNumber {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An order created from a settled payment.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub user_id: UserId,
    pub cart_id: CartId,
    /// At most one order exists per payment reference.
    pub payment_reference: PaymentReference,
    pub items: Vec<LineItem>,
    pub totals: CartTotals,
    pub shipping_method: ShippingMethod,
    pub shipping_address: Option<Address>,
    pub status: OrderStatus,
    pub tracking_number: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub webhook_log_id: Option<WebhookLogId>,
    pub created_at: DateTime<Utc>,
}

/// Result of inserting an order keyed by payment reference.
#[derive(Debug, Clone)]
pub enum OrderInsert {
    /// The order was written by this call.
    Created(Order),
    /// An order already existed for the payment reference.
    Existing(Order),
}

impl OrderInsert {
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Created(order) | Self::Existing(order) => order,
        }
    }

    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}
