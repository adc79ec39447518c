//! Stock ledger types.

use chrono::{DateTime, Utc};

use lux_core::{OrderId, ProductId, StockLedgerId, StockReason};

/// One applied stock change. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLedgerEntry {
    pub id: StockLedgerId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub order_number: String,
    /// Signed change requested (negative for sales).
    pub delta: i64,
    pub previous_stock: i64,
    /// Stock after the change, clamped at zero.
    pub new_stock: i64,
    pub reason: StockReason,
    pub created_at: DateTime<Utc>,
}

/// A request to decrement one product's stock for one order.
#[derive(Debug, Clone)]
pub struct StockDecrement {
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub order_number: String,
    /// Units sold; always positive.
    pub quantity: i64,
}

impl StockDecrement {
    /// Resulting stock level, never below zero.
    #[must_use]
    pub fn clamped(&self, previous: i64) -> i64 {
        previous.saturating_sub(self.quantity).max(0)
    }

    /// Build the ledger entry for applying this decrement to `previous` stock.
    #[must_use]
    pub fn ledger_entry(&self, previous: i64) -> StockLedgerEntry {
        StockLedgerEntry {
            id: StockLedgerId::generate(),
            product_id: self.product_id.clone(),
            order_id: self.order_id.clone(),
            order_number: self.order_number.clone(),
            delta: -self.quantity,
            previous_stock: previous,
            new_stock: self.clamped(previous),
            reason: StockReason::OrderPlaced,
            created_at: Utc::now(),
        }
    }
}

/// Result of a conditional decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Stock was changed and the ledger entry written.
    Applied(StockLedgerEntry),
    /// A ledger entry for this (order, product) already exists; nothing changed.
    AlreadyApplied,
    /// The product is not in the catalog.
    ProductMissing,
}
