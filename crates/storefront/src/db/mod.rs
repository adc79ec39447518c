//! Persistence for checkout.
//!
//! # Database: `lux_checkout`
//!
//! ## Tables (schema `checkout`)
//!
//! - `carts` - Carts with their priced totals and status
//! - `payments` - Payment records keyed by gateway reference, with fulfillment stage
//! - `orders` - Orders, unique per payment reference and per order number
//! - `products` - Stock levels (the catalog itself is owned elsewhere)
//! - `stock_ledger` - Append-only stock changes, unique per (order, product)
//! - `webhook_events` - Append-only webhook delivery log
//! - `payment_failures` - Payments that failed to settle
//! - `sessions` - Tower-sessions storage
//!
//! Every store is a trait so the services run unchanged against `PostgreSQL`
//! ([`postgres`]) or process memory ([`memory`], used by tests and demos).
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p lux-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use lux_core::{Address, CartId, OrderId, PaymentReference, ProductId, UserId, WebhookLogId};

use crate::models::{
    Cart, CartTotals, DecrementOutcome, NewWebhookLog, Order, OrderInsert, PaymentAbandonment,
    PaymentFailure, PaymentRecord, ShippingMethod, StockDecrement, StockLedgerEntry, Transition,
    WebhookLog,
};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate order number).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError>;

    /// Insert or replace a cart. Used by seeding and tests; checkout never creates carts.
    async fn put(&self, cart: &Cart) -> Result<(), RepositoryError>;

    /// Persist the result of pricing: destination, chosen method and totals.
    ///
    /// Returns `NotFound` for an unknown cart.
    async fn save_pricing(
        &self,
        id: &CartId,
        address: &Address,
        method: ShippingMethod,
        totals: &CartTotals,
    ) -> Result<(), RepositoryError>;

    /// Bind a payment reference to the cart.
    async fn bind_payment(
        &self,
        id: &CartId,
        reference: &PaymentReference,
    ) -> Result<(), RepositoryError>;

    /// Close an open cart and link it to its order.
    ///
    /// Returns `Ok(false)` if the cart was already completed for the same order,
    /// and `Conflict` if it was completed for a different one.
    async fn complete(&self, id: &CartId, order_id: &OrderId) -> Result<bool, RepositoryError>;
}

/// Payment records and their fulfillment stage.
///
/// Every state change is conditional on the current stage, so concurrent or
/// replayed deliveries cannot apply the same step twice.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new pending record. `Conflict` if the reference already exists.
    async fn insert(&self, record: &PaymentRecord) -> Result<(), RepositoryError>;

    async fn get(&self, reference: &PaymentReference)
    -> Result<Option<PaymentRecord>, RepositoryError>;

    /// `Pending -> Succeeded`, recording the settled amount.
    async fn mark_succeeded(
        &self,
        reference: &PaymentReference,
        settled_amount: Decimal,
    ) -> Result<Transition, RepositoryError>;

    /// `Succeeded -> OrderCreated`, backfilling the order id and number.
    async fn record_order(
        &self,
        reference: &PaymentReference,
        order_id: &OrderId,
        order_number: &str,
    ) -> Result<Transition, RepositoryError>;

    /// `OrderCreated -> StockApplied`.
    async fn mark_stock_applied(
        &self,
        reference: &PaymentReference,
    ) -> Result<Transition, RepositoryError>;

    /// `StockApplied -> CartClosed`.
    async fn mark_cart_closed(
        &self,
        reference: &PaymentReference,
    ) -> Result<Transition, RepositoryError>;

    /// `Pending -> Failed` or `Pending -> Canceled`, with the gateway's reason.
    async fn abandon(
        &self,
        reference: &PaymentReference,
        abandonment: &PaymentAbandonment,
    ) -> Result<Transition, RepositoryError>;
}

/// Orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order unless one already exists for its payment reference.
    ///
    /// Returns `Conflict` if the order number is already taken by another order.
    async fn insert(&self, order: &Order) -> Result<OrderInsert, RepositoryError>;

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn get_by_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, RepositoryError>;
}

/// Product stock levels and the stock ledger.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Current stock, `None` if the product is not in the catalog.
    async fn read_stock(&self, product_id: &ProductId) -> Result<Option<i64>, RepositoryError>;

    /// Atomically read, clamp at zero, write, and append the ledger entry.
    ///
    /// Applies at most once per (order, product).
    async fn conditional_decrement(
        &self,
        decrement: &StockDecrement,
    ) -> Result<DecrementOutcome, RepositoryError>;

    /// Set a product's stock level, creating the product row if needed.
    async fn set_stock(&self, product_id: &ProductId, stock: i64) -> Result<(), RepositoryError>;

    async fn ledger_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<StockLedgerEntry>, RepositoryError>;
}

/// The append-only webhook delivery log.
#[async_trait]
pub trait WebhookLogStore: Send + Sync {
    /// Append a row with `processed = false`.
    async fn append(&self, entry: &NewWebhookLog) -> Result<WebhookLog, RepositoryError>;

    /// Mark processed, clearing nothing else.
    async fn mark_processed(&self, id: &WebhookLogId) -> Result<(), RepositoryError>;

    /// Record a handler error. The row stays unprocessed.
    async fn mark_error(&self, id: &WebhookLogId, error: &str) -> Result<(), RepositoryError>;

    async fn get(&self, id: &WebhookLogId) -> Result<Option<WebhookLog>, RepositoryError>;

    /// Unprocessed rows, oldest first.
    async fn backlog(&self, limit: i64) -> Result<Vec<WebhookLog>, RepositoryError>;

    /// All rows received for a gateway event id, oldest first.
    async fn for_event(&self, event_id: &str) -> Result<Vec<WebhookLog>, RepositoryError>;
}

/// Payment failure records.
#[async_trait]
pub trait FailureStore: Send + Sync {
    async fn record(&self, failure: &PaymentFailure) -> Result<(), RepositoryError>;

    /// Most recent first.
    async fn recent(&self, limit: i64) -> Result<Vec<PaymentFailure>, RepositoryError>;

    async fn for_user(&self, user_id: &UserId) -> Result<Vec<PaymentFailure>, RepositoryError>;

    async fn for_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Vec<PaymentFailure>, RepositoryError>;
}

/// The full set of stores the checkout services use.
#[derive(Clone)]
pub struct Stores {
    pub carts: Arc<dyn CartStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub orders: Arc<dyn OrderStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub webhook_log: Arc<dyn WebhookLogStore>,
    pub failures: Arc<dyn FailureStore>,
}

impl Stores {
    /// Stores backed by `PostgreSQL`.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            carts: Arc::new(postgres::PgCartStore::new(pool.clone())),
            payments: Arc::new(postgres::PgPaymentStore::new(pool.clone())),
            orders: Arc::new(postgres::PgOrderStore::new(pool.clone())),
            inventory: Arc::new(postgres::PgInventoryStore::new(pool.clone())),
            webhook_log: Arc::new(postgres::PgWebhookLogStore::new(pool.clone())),
            failures: Arc::new(postgres::PgFailureStore::new(pool.clone())),
        }
    }

    /// Stores held in process memory.
    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self {
            carts: store.clone(),
            payments: store.clone(),
            orders: store.clone(),
            inventory: store.clone(),
            webhook_log: store.clone(),
            failures: store,
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
