//! Payment record types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lux_core::{
    CartId, CurrencyCode, FulfillmentState, OrderId, PaymentReference, PaymentStatus, UserId,
};

/// Metadata attached to a payment at the gateway and echoed back in its events.
///
/// The gateway stores metadata as a flat string map; field names are the wire keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub item_count: u64,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl PaymentMetadata {
    /// Flatten into the gateway's string map.
    #[must_use]
    pub fn to_gateway_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::from([
            ("cartId".to_string(), self.cart_id.to_string()),
            ("userId".to_string(), self.user_id.to_string()),
            ("itemCount".to_string(), self.item_count.to_string()),
            ("subtotal".to_string(), self.subtotal.to_string()),
            ("shipping".to_string(), self.shipping.to_string()),
            ("tax".to_string(), self.tax.to_string()),
        ]);
        if let Some(order_id) = &self.order_id {
            map.insert("orderId".to_string(), order_id.clone());
        }
        map
    }
}

/// A payment authorization bound to a cart, keyed by the gateway reference.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub reference: PaymentReference,
    pub cart_id: CartId,
    pub user_id: UserId,
    /// Authorized amount in standard units.
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub client_secret: String,
    pub metadata: PaymentMetadata,
    pub state: FulfillmentState,
    /// Amount the gateway reported as settled.
    pub settled_amount: Option<Decimal>,
    pub order_id: Option<OrderId>,
    pub order_number: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_code: Option<String>,
    pub canceled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Client-facing payment status.
    #[must_use]
    pub const fn status(&self) -> PaymentStatus {
        self.state.payment_status()
    }

    /// True once the order exists and the cart has been closed.
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        self.order_id.is_some() && matches!(self.state, FulfillmentState::CartClosed)
    }
}

/// Outcome of a conditional state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// This call moved the record.
    Applied,
    /// The record had already reached the requested state.
    AlreadyInState,
    /// The record is in a state from which the change is not allowed.
    Rejected(FulfillmentState),
}

impl Transition {
    /// Classify a change that did not apply, given the record's current state.
    #[must_use]
    pub fn not_applied(current: FulfillmentState, target: FulfillmentState) -> Self {
        if current.has_reached(target) {
            Self::AlreadyInState
        } else {
            Self::Rejected(current)
        }
    }

    #[must_use]
    pub const fn was_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// How a record failed to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAbandonment {
    Failed {
        reason: String,
        code: Option<String>,
    },
    Canceled {
        reason: String,
    },
}

impl PaymentAbandonment {
    #[must_use]
    pub const fn target_state(&self) -> FulfillmentState {
        match self {
            Self::Failed { .. } => FulfillmentState::Failed,
            Self::Canceled { .. } => FulfillmentState::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(order_id: Option<&str>) -> PaymentMetadata {
        PaymentMetadata {
            cart_id: CartId::new("cart-1"),
            user_id: UserId::new("user-1"),
            item_count: 2,
            subtotal: Decimal::new(20000, 2),
            shipping: Decimal::new(3500, 2),
            tax: Decimal::new(1704, 2),
            order_id: order_id.map(str::to_owned),
        }
    }

    #[test]
    fn test_gateway_map_includes_order_hint_only_when_present() {
        let without = metadata(None).to_gateway_map();
        assert_eq!(without.get("cartId").map(String::as_str), Some("cart-1"));
        assert_eq!(without.get("itemCount").map(String::as_str), Some("2"));
        assert_eq!(without.get("tax").map(String::as_str), Some("17.04"));
        assert!(!without.contains_key("orderId"));

        let with = metadata(Some("draft-9")).to_gateway_map();
        assert_eq!(with.get("orderId").map(String::as_str), Some("draft-9"));
    }

    #[test]
    fn test_not_applied_classification() {
        assert_eq!(
            Transition::not_applied(FulfillmentState::CartClosed, FulfillmentState::Succeeded),
            Transition::AlreadyInState
        );
        assert_eq!(
            Transition::not_applied(FulfillmentState::Failed, FulfillmentState::Succeeded),
            Transition::Rejected(FulfillmentState::Failed)
        );
        assert_eq!(
            Transition::not_applied(FulfillmentState::Succeeded, FulfillmentState::Canceled),
            Transition::Rejected(FulfillmentState::Succeeded)
        );
    }
}
