//! `PostgreSQL` stores.
//!
//! Queries are built at runtime (`sqlx::query_as` with `FromRow` row types) so the
//! crate builds without a live database. Status columns are plain text; rows are
//! converted to domain types here, and unknown values surface as
//! `RepositoryError::DataCorruption`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use lux_core::{
    Address, CartId, CartStatus, CurrencyCode, FulfillmentState, OrderId, OrderStatus,
    PaymentFailureId, PaymentReference, ProductId, StockLedgerId, StockReason, UserId,
    WebhookLogId,
};

use super::{
    CartStore, FailureStore, InventoryStore, OrderStore, PaymentStore, RepositoryError,
    WebhookLogStore,
};
use crate::models::{
    Cart, CartTotals, DecrementOutcome, LineItem, NewWebhookLog, Order, OrderInsert,
    PaymentAbandonment, PaymentFailure, PaymentMetadata, PaymentRecord, ShippingMethod,
    StockDecrement, StockLedgerEntry, Transition, WebhookLog,
};

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}

fn parse_shipping_method(value: &str) -> Result<ShippingMethod, RepositoryError> {
    match value {
        "standard" => Ok(ShippingMethod::Standard),
        "express" => Ok(ShippingMethod::Express),
        other => Err(RepositoryError::DataCorruption(format!(
            "invalid shipping_method in database: {other}"
        ))),
    }
}

fn unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

// =============================================================================
// Carts
// =============================================================================

#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    user_id: Option<UserId>,
    items: Json<Vec<LineItem>>,
    address: Option<Json<Address>>,
    shipping_method: Option<String>,
    subtotal: Decimal,
    shipping: Decimal,
    tax: Decimal,
    discount: Decimal,
    total: Decimal,
    currency: String,
    status: String,
    payment_reference: Option<PaymentReference>,
    order_id: Option<OrderId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = RepositoryError;

    fn try_from(r: CartRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            items: r.items.0,
            address: r.address.map(|a| a.0),
            shipping_method: r
                .shipping_method
                .as_deref()
                .map(parse_shipping_method)
                .transpose()?,
            totals: CartTotals {
                subtotal: r.subtotal,
                shipping: r.shipping,
                tax: r.tax,
                discount: r.discount,
                total: r.total,
                currency: parse_column::<CurrencyCode>("currency", &r.currency)?,
            },
            status: parse_column::<CartStatus>("cart status", &r.status)?,
            payment_reference: r.payment_reference,
            order_id: r.order_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Carts in `checkout.carts`.
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn get(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(
            r"
            SELECT id, user_id, items, address, shipping_method,
                   subtotal, shipping, tax, discount, total, currency,
                   status, payment_reference, order_id, created_at, updated_at
            FROM checkout.carts
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Cart::try_from).transpose()
    }

    async fn put(&self, cart: &Cart) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO checkout.carts (
                id, user_id, items, address, shipping_method,
                subtotal, shipping, tax, discount, total, currency,
                status, payment_reference, order_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                items = EXCLUDED.items,
                address = EXCLUDED.address,
                shipping_method = EXCLUDED.shipping_method,
                subtotal = EXCLUDED.subtotal,
                shipping = EXCLUDED.shipping,
                tax = EXCLUDED.tax,
                discount = EXCLUDED.discount,
                total = EXCLUDED.total,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                payment_reference = EXCLUDED.payment_reference,
                order_id = EXCLUDED.order_id,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(&cart.id)
        .bind(cart.user_id.as_ref())
        .bind(Json(&cart.items))
        .bind(cart.address.as_ref().map(Json))
        .bind(cart.shipping_method.map(ShippingMethod::as_str))
        .bind(cart.totals.subtotal)
        .bind(cart.totals.shipping)
        .bind(cart.totals.tax)
        .bind(cart.totals.discount)
        .bind(cart.totals.total)
        .bind(cart.totals.currency.code())
        .bind(cart.status.as_str())
        .bind(cart.payment_reference.as_ref())
        .bind(cart.order_id.as_ref())
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_pricing(
        &self,
        id: &CartId,
        address: &Address,
        method: ShippingMethod,
        totals: &CartTotals,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.carts
            SET address = $2, shipping_method = $3,
                subtotal = $4, shipping = $5, tax = $6, discount = $7, total = $8,
                currency = $9, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(Json(address))
        .bind(method.as_str())
        .bind(totals.subtotal)
        .bind(totals.shipping)
        .bind(totals.tax)
        .bind(totals.discount)
        .bind(totals.total)
        .bind(totals.currency.code())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn bind_payment(
        &self,
        id: &CartId,
        reference: &PaymentReference,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.carts
            SET payment_reference = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(reference)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn complete(&self, id: &CartId, order_id: &OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.carts
            SET status = 'completed', order_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'open'
            ",
        )
        .bind(id)
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let existing: Option<(String, Option<OrderId>)> =
            sqlx::query_as("SELECT status, order_id FROM checkout.carts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => Err(RepositoryError::NotFound),
            Some((_, Some(existing))) if &existing == order_id => Ok(false),
            Some((status, _)) => Err(RepositoryError::Conflict(format!(
                "cart {id} is {status} for another order"
            ))),
        }
    }
}

// =============================================================================
// Payments
// =============================================================================

#[derive(sqlx::FromRow)]
struct PaymentRow {
    reference: PaymentReference,
    cart_id: CartId,
    user_id: UserId,
    amount: Decimal,
    currency: String,
    client_secret: String,
    metadata: Json<PaymentMetadata>,
    state: String,
    settled_amount: Option<Decimal>,
    order_id: Option<OrderId>,
    order_number: Option<String>,
    failure_reason: Option<String>,
    failure_code: Option<String>,
    canceled_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = RepositoryError;

    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            reference: r.reference,
            cart_id: r.cart_id,
            user_id: r.user_id,
            amount: r.amount,
            currency: parse_column::<CurrencyCode>("currency", &r.currency)?,
            client_secret: r.client_secret,
            metadata: r.metadata.0,
            state: parse_column::<FulfillmentState>("payment state", &r.state)?,
            settled_amount: r.settled_amount,
            order_id: r.order_id,
            order_number: r.order_number,
            failure_reason: r.failure_reason,
            failure_code: r.failure_code,
            canceled_reason: r.canceled_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Payment records in `checkout.payments`.
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Classify a conditional update that matched no row.
    async fn not_applied(
        &self,
        reference: &PaymentReference,
        target: FulfillmentState,
    ) -> Result<Transition, RepositoryError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM checkout.payments WHERE reference = $1")
                .bind(reference)
                .fetch_optional(&self.pool)
                .await?;

        let state = state.ok_or(RepositoryError::NotFound)?;
        let current = parse_column::<FulfillmentState>("payment state", &state)?;
        Ok(Transition::not_applied(current, target))
    }

    async fn advance(
        &self,
        reference: &PaymentReference,
        from: FulfillmentState,
        to: FulfillmentState,
    ) -> Result<Transition, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.payments
            SET state = $3, updated_at = NOW()
            WHERE reference = $1 AND state = $2
            ",
        )
        .bind(reference)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }
        self.not_applied(reference, to).await
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, record: &PaymentRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO checkout.payments (
                reference, cart_id, user_id, amount, currency, client_secret,
                metadata, state, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&record.reference)
        .bind(&record.cart_id)
        .bind(&record.user_id)
        .bind(record.amount)
        .bind(record.currency.code())
        .bind(&record.client_secret)
        .bind(Json(&record.metadata))
        .bind(record.state.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "payment"))?;

        Ok(())
    }

    async fn get(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r"
            SELECT reference, cart_id, user_id, amount, currency, client_secret,
                   metadata, state, settled_amount, order_id, order_number,
                   failure_reason, failure_code, canceled_reason, created_at, updated_at
            FROM checkout.payments
            WHERE reference = $1
            ",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn mark_succeeded(
        &self,
        reference: &PaymentReference,
        settled_amount: Decimal,
    ) -> Result<Transition, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.payments
            SET state = 'succeeded', settled_amount = $2, updated_at = NOW()
            WHERE reference = $1 AND state = 'pending'
            ",
        )
        .bind(reference)
        .bind(settled_amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }
        self.not_applied(reference, FulfillmentState::Succeeded).await
    }

    async fn record_order(
        &self,
        reference: &PaymentReference,
        order_id: &OrderId,
        order_number: &str,
    ) -> Result<Transition, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.payments
            SET state = 'order_created', order_id = $2, order_number = $3, updated_at = NOW()
            WHERE reference = $1 AND state = 'succeeded'
            ",
        )
        .bind(reference)
        .bind(order_id)
        .bind(order_number)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }
        self.not_applied(reference, FulfillmentState::OrderCreated)
            .await
    }

    async fn mark_stock_applied(
        &self,
        reference: &PaymentReference,
    ) -> Result<Transition, RepositoryError> {
        self.advance(
            reference,
            FulfillmentState::OrderCreated,
            FulfillmentState::StockApplied,
        )
        .await
    }

    async fn mark_cart_closed(
        &self,
        reference: &PaymentReference,
    ) -> Result<Transition, RepositoryError> {
        self.advance(
            reference,
            FulfillmentState::StockApplied,
            FulfillmentState::CartClosed,
        )
        .await
    }

    async fn abandon(
        &self,
        reference: &PaymentReference,
        abandonment: &PaymentAbandonment,
    ) -> Result<Transition, RepositoryError> {
        let (failure_reason, failure_code, canceled_reason) = match abandonment {
            PaymentAbandonment::Failed { reason, code } => {
                (Some(reason.as_str()), code.as_deref(), None)
            }
            PaymentAbandonment::Canceled { reason } => (None, None, Some(reason.as_str())),
        };
        let target = abandonment.target_state();

        let result = sqlx::query(
            r"
            UPDATE checkout.payments
            SET state = $2, failure_reason = $3, failure_code = $4, canceled_reason = $5,
                updated_at = NOW()
            WHERE reference = $1 AND state = 'pending'
            ",
        )
        .bind(reference)
        .bind(target.as_str())
        .bind(failure_reason)
        .bind(failure_code)
        .bind(canceled_reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }
        self.not_applied(reference, target).await
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    user_id: UserId,
    cart_id: CartId,
    payment_reference: PaymentReference,
    items: Json<Vec<LineItem>>,
    subtotal: Decimal,
    shipping: Decimal,
    tax: Decimal,
    discount: Decimal,
    total: Decimal,
    currency: String,
    shipping_method: String,
    shipping_address: Option<Json<Address>>,
    status: String,
    tracking_number: Option<String>,
    paid_at: DateTime<Utc>,
    webhook_log_id: Option<WebhookLogId>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            order_number: r.order_number.into(),
            user_id: r.user_id,
            cart_id: r.cart_id,
            payment_reference: r.payment_reference,
            items: r.items.0,
            totals: CartTotals {
                subtotal: r.subtotal,
                shipping: r.shipping,
                tax: r.tax,
                discount: r.discount,
                total: r.total,
                currency: parse_column::<CurrencyCode>("currency", &r.currency)?,
            },
            shipping_method: parse_shipping_method(&r.shipping_method)?,
            shipping_address: r.shipping_address.map(|a| a.0),
            status: parse_column::<OrderStatus>("order status", &r.status)?,
            tracking_number: r.tracking_number,
            paid_at: r.paid_at,
            webhook_log_id: r.webhook_log_id,
            created_at: r.created_at,
        })
    }
}

const ORDER_COLUMNS: &str = r"
    id, order_number, user_id, cart_id, payment_reference, items,
    subtotal, shipping, tax, discount, total, currency,
    shipping_method, shipping_address, status, tracking_number,
    paid_at, webhook_log_id, created_at
";

/// Orders in `checkout.orders`.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM checkout.orders WHERE {column} = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Order::try_from).transpose()
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<OrderInsert, RepositoryError> {
        let inserted: Option<OrderId> = sqlx::query_scalar(
            r"
            INSERT INTO checkout.orders (
                id, order_number, user_id, cart_id, payment_reference, items,
                subtotal, shipping, tax, discount, total, currency,
                shipping_method, shipping_address, status, tracking_number,
                paid_at, webhook_log_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (payment_reference) DO NOTHING
            RETURNING id
            ",
        )
        .bind(&order.id)
        .bind(order.order_number.as_str())
        .bind(&order.user_id)
        .bind(&order.cart_id)
        .bind(&order.payment_reference)
        .bind(Json(&order.items))
        .bind(order.totals.subtotal)
        .bind(order.totals.shipping)
        .bind(order.totals.tax)
        .bind(order.totals.discount)
        .bind(order.totals.total)
        .bind(order.totals.currency.code())
        .bind(order.shipping_method.as_str())
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(order.status.as_str())
        .bind(order.tracking_number.as_deref())
        .bind(order.paid_at)
        .bind(order.webhook_log_id.as_ref())
        .bind(order.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "order number"))?;

        if inserted.is_some() {
            return Ok(OrderInsert::Created(order.clone()));
        }

        let existing = self
            .get_by_payment(&order.payment_reference)
            .await?
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!(
                    "order insert for {} conflicted but no order exists",
                    order.payment_reference
                ))
            })?;
        Ok(OrderInsert::Existing(existing))
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        self.fetch_one_where("id", id.as_str()).await
    }

    async fn get_by_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, RepositoryError> {
        self.fetch_one_where("payment_reference", reference.as_str())
            .await
    }
}

// =============================================================================
// Inventory
// =============================================================================

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: StockLedgerId,
    product_id: ProductId,
    order_id: OrderId,
    order_number: String,
    delta: i64,
    previous_stock: i64,
    new_stock: i64,
    reason: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for StockLedgerEntry {
    type Error = RepositoryError;

    fn try_from(r: LedgerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            product_id: r.product_id,
            order_id: r.order_id,
            order_number: r.order_number,
            delta: r.delta,
            previous_stock: r.previous_stock,
            new_stock: r.new_stock,
            reason: parse_column::<StockReason>("stock reason", &r.reason)?,
            created_at: r.created_at,
        })
    }
}

/// Product stock in `checkout.products`, changes in `checkout.stock_ledger`.
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        decrement: &StockDecrement,
    ) -> Result<DecrementOutcome, RepositoryError> {
        // Row lock serializes concurrent decrements of the same product.
        let previous: Option<i64> =
            sqlx::query_scalar("SELECT stock FROM checkout.products WHERE id = $1 FOR UPDATE")
                .bind(&decrement.product_id)
                .fetch_optional(&mut **tx)
                .await?;

        let Some(previous) = previous else {
            return Ok(DecrementOutcome::ProductMissing);
        };

        let entry = decrement.ledger_entry(previous);
        let inserted = sqlx::query(
            r"
            INSERT INTO checkout.stock_ledger (
                id, product_id, order_id, order_number, delta,
                previous_stock, new_stock, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (order_id, product_id) DO NOTHING
            ",
        )
        .bind(&entry.id)
        .bind(&entry.product_id)
        .bind(&entry.order_id)
        .bind(&entry.order_number)
        .bind(entry.delta)
        .bind(entry.previous_stock)
        .bind(entry.new_stock)
        .bind(entry.reason.as_str())
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(DecrementOutcome::AlreadyApplied);
        }

        sqlx::query("UPDATE checkout.products SET stock = $2, updated_at = NOW() WHERE id = $1")
            .bind(&entry.product_id)
            .bind(entry.new_stock)
            .execute(&mut **tx)
            .await?;

        Ok(DecrementOutcome::Applied(entry))
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn read_stock(&self, product_id: &ProductId) -> Result<Option<i64>, RepositoryError> {
        let stock = sqlx::query_scalar("SELECT stock FROM checkout.products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(stock)
    }

    async fn conditional_decrement(
        &self,
        decrement: &StockDecrement,
    ) -> Result<DecrementOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::apply(&mut tx, decrement).await?;

        if matches!(outcome, DecrementOutcome::Applied(_)) {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    async fn set_stock(&self, product_id: &ProductId, stock: i64) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO checkout.products (id, stock)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET stock = EXCLUDED.stock, updated_at = NOW()
            ",
        )
        .bind(product_id)
        .bind(stock)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ledger_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<StockLedgerEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r"
            SELECT id, product_id, order_id, order_number, delta,
                   previous_stock, new_stock, reason, created_at
            FROM checkout.stock_ledger
            WHERE order_id = $1
            ORDER BY created_at
            ",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StockLedgerEntry::try_from).collect()
    }
}

// =============================================================================
// Webhook log
// =============================================================================

#[derive(sqlx::FromRow)]
struct WebhookRow {
    id: WebhookLogId,
    event_id: String,
    kind: String,
    gateway_created: DateTime<Utc>,
    payload: serde_json::Value,
    processed: bool,
    error: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    error_at: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
}

impl From<WebhookRow> for WebhookLog {
    fn from(r: WebhookRow) -> Self {
        Self {
            id: r.id,
            event_id: r.event_id,
            kind: r.kind,
            gateway_created: r.gateway_created,
            payload: r.payload,
            processed: r.processed,
            error: r.error,
            processed_at: r.processed_at,
            error_at: r.error_at,
            received_at: r.received_at,
        }
    }
}

const WEBHOOK_COLUMNS: &str = r"
    id, event_id, kind, gateway_created, payload, processed,
    error, processed_at, error_at, received_at
";

/// Delivery log in `checkout.webhook_events`.
pub struct PgWebhookLogStore {
    pool: PgPool,
}

impl PgWebhookLogStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookLogStore for PgWebhookLogStore {
    async fn append(&self, entry: &NewWebhookLog) -> Result<WebhookLog, RepositoryError> {
        let sql = format!(
            r"
            INSERT INTO checkout.webhook_events (id, event_id, kind, gateway_created, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {WEBHOOK_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, WebhookRow>(&sql)
            .bind(WebhookLogId::generate())
            .bind(&entry.event_id)
            .bind(&entry.kind)
            .bind(entry.gateway_created)
            .bind(&entry.payload)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn mark_processed(&self, id: &WebhookLogId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE checkout.webhook_events SET processed = TRUE, processed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_error(&self, id: &WebhookLogId, error: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.webhook_events
            SET processed = FALSE, error = $2, error_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, id: &WebhookLogId) -> Result<Option<WebhookLog>, RepositoryError> {
        let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM checkout.webhook_events WHERE id = $1");
        let row = sqlx::query_as::<_, WebhookRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn backlog(&self, limit: i64) -> Result<Vec<WebhookLog>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {WEBHOOK_COLUMNS}
            FROM checkout.webhook_events
            WHERE processed = FALSE
            ORDER BY received_at
            LIMIT $1
            "
        );
        let rows = sqlx::query_as::<_, WebhookRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn for_event(&self, event_id: &str) -> Result<Vec<WebhookLog>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {WEBHOOK_COLUMNS}
            FROM checkout.webhook_events
            WHERE event_id = $1
            ORDER BY received_at
            "
        );
        let rows = sqlx::query_as::<_, WebhookRow>(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Payment failures
// =============================================================================

#[derive(sqlx::FromRow)]
struct FailureRow {
    id: PaymentFailureId,
    payment_reference: PaymentReference,
    user_id: Option<UserId>,
    amount: Decimal,
    currency: String,
    failure_reason: String,
    failure_code: Option<String>,
    webhook_log_id: Option<WebhookLogId>,
    created_at: DateTime<Utc>,
}

impl From<FailureRow> for PaymentFailure {
    fn from(r: FailureRow) -> Self {
        Self {
            id: r.id,
            payment_reference: r.payment_reference,
            user_id: r.user_id,
            amount: r.amount,
            currency: r.currency,
            failure_reason: r.failure_reason,
            failure_code: r.failure_code,
            webhook_log_id: r.webhook_log_id,
            created_at: r.created_at,
        }
    }
}

const FAILURE_COLUMNS: &str = r"
    id, payment_reference, user_id, amount, currency,
    failure_reason, failure_code, webhook_log_id, created_at
";

/// Failures in `checkout.payment_failures`.
pub struct PgFailureStore {
    pool: PgPool,
}

impl PgFailureStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailureStore for PgFailureStore {
    async fn record(&self, failure: &PaymentFailure) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO checkout.payment_failures (
                id, payment_reference, user_id, amount, currency,
                failure_reason, failure_code, webhook_log_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(&failure.id)
        .bind(&failure.payment_reference)
        .bind(failure.user_id.as_ref())
        .bind(failure.amount)
        .bind(&failure.currency)
        .bind(&failure.failure_reason)
        .bind(failure.failure_code.as_deref())
        .bind(failure.webhook_log_id.as_ref())
        .bind(failure.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<PaymentFailure>, RepositoryError> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM checkout.payment_failures ORDER BY created_at DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, FailureRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn for_user(&self, user_id: &UserId) -> Result<Vec<PaymentFailure>, RepositoryError> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM checkout.payment_failures WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, FailureRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn for_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Vec<PaymentFailure>, RepositoryError> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM checkout.payment_failures WHERE payment_reference = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, FailureRow>(&sql)
            .bind(reference)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
