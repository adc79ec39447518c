//! In-memory stores.
//!
//! All collections live behind one async mutex, so every operation is atomic with
//! respect to every other. Used by the integration tests and local demos; nothing
//! survives a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use lux_core::{
    Address, CartId, CartStatus, FulfillmentState, OrderId, PaymentReference, ProductId, UserId,
    WebhookLogId,
};

use super::{
    CartStore, FailureStore, InventoryStore, OrderStore, PaymentStore, RepositoryError,
    WebhookLogStore,
};
use crate::models::{
    Cart, CartTotals, DecrementOutcome, NewWebhookLog, Order, OrderInsert, PaymentAbandonment,
    PaymentFailure, PaymentRecord, ShippingMethod, StockDecrement, StockLedgerEntry, Transition,
    WebhookLog,
};

#[derive(Default)]
struct Collections {
    carts: HashMap<CartId, Cart>,
    payments: HashMap<PaymentReference, PaymentRecord>,
    orders: Vec<Order>,
    stock: HashMap<ProductId, i64>,
    ledger: Vec<StockLedgerEntry>,
    ledger_keys: HashSet<(OrderId, ProductId)>,
    webhook_log: Vec<WebhookLog>,
    failures: Vec<PaymentFailure>,
}

/// Every checkout store, held in memory.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Collections>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Apply `update` if the record is in `from`, otherwise classify against `to`.
fn step(
    payments: &mut HashMap<PaymentReference, PaymentRecord>,
    reference: &PaymentReference,
    from: FulfillmentState,
    to: FulfillmentState,
    update: impl FnOnce(&mut PaymentRecord),
) -> Result<Transition, RepositoryError> {
    let record = payments.get_mut(reference).ok_or(RepositoryError::NotFound)?;
    if record.state != from {
        return Ok(Transition::not_applied(record.state, to));
    }
    update(record);
    record.state = to;
    record.updated_at = Utc::now();
    Ok(Transition::Applied)
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn get(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.data.lock().await.carts.get(id).cloned())
    }

    async fn put(&self, cart: &Cart) -> Result<(), RepositoryError> {
        self.data
            .lock()
            .await
            .carts
            .insert(cart.id.clone(), cart.clone());
        Ok(())
    }

    async fn save_pricing(
        &self,
        id: &CartId,
        address: &Address,
        method: ShippingMethod,
        totals: &CartTotals,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        let cart = data.carts.get_mut(id).ok_or(RepositoryError::NotFound)?;
        cart.address = Some(address.clone());
        cart.shipping_method = Some(method);
        cart.totals = totals.clone();
        cart.updated_at = Utc::now();
        Ok(())
    }

    async fn bind_payment(
        &self,
        id: &CartId,
        reference: &PaymentReference,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        let cart = data.carts.get_mut(id).ok_or(RepositoryError::NotFound)?;
        cart.payment_reference = Some(reference.clone());
        cart.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, id: &CartId, order_id: &OrderId) -> Result<bool, RepositoryError> {
        let mut data = self.data.lock().await;
        let cart = data.carts.get_mut(id).ok_or(RepositoryError::NotFound)?;
        match (cart.status, &cart.order_id) {
            (CartStatus::Completed, Some(existing)) if existing == order_id => Ok(false),
            (CartStatus::Completed, _) => Err(RepositoryError::Conflict(format!(
                "cart {id} already completed for another order"
            ))),
            (CartStatus::Open, _) => {
                cart.status = CartStatus::Completed;
                cart.order_id = Some(order_id.clone());
                cart.updated_at = Utc::now();
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert(&self, record: &PaymentRecord) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        if data.payments.contains_key(&record.reference) {
            return Err(RepositoryError::Conflict(format!(
                "payment {} already exists",
                record.reference
            )));
        }
        data.payments
            .insert(record.reference.clone(), record.clone());
        Ok(())
    }

    async fn get(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        Ok(self.data.lock().await.payments.get(reference).cloned())
    }

    async fn mark_succeeded(
        &self,
        reference: &PaymentReference,
        settled_amount: Decimal,
    ) -> Result<Transition, RepositoryError> {
        let mut data = self.data.lock().await;
        step(
            &mut data.payments,
            reference,
            FulfillmentState::Pending,
            FulfillmentState::Succeeded,
            |record| record.settled_amount = Some(settled_amount),
        )
    }

    async fn record_order(
        &self,
        reference: &PaymentReference,
        order_id: &OrderId,
        order_number: &str,
    ) -> Result<Transition, RepositoryError> {
        let mut data = self.data.lock().await;
        step(
            &mut data.payments,
            reference,
            FulfillmentState::Succeeded,
            FulfillmentState::OrderCreated,
            |record| {
                record.order_id = Some(order_id.clone());
                record.order_number = Some(order_number.to_string());
            },
        )
    }

    async fn mark_stock_applied(
        &self,
        reference: &PaymentReference,
    ) -> Result<Transition, RepositoryError> {
        let mut data = self.data.lock().await;
        step(
            &mut data.payments,
            reference,
            FulfillmentState::OrderCreated,
            FulfillmentState::StockApplied,
            |_| {},
        )
    }

    async fn mark_cart_closed(
        &self,
        reference: &PaymentReference,
    ) -> Result<Transition, RepositoryError> {
        let mut data = self.data.lock().await;
        step(
            &mut data.payments,
            reference,
            FulfillmentState::StockApplied,
            FulfillmentState::CartClosed,
            |_| {},
        )
    }

    async fn abandon(
        &self,
        reference: &PaymentReference,
        abandonment: &PaymentAbandonment,
    ) -> Result<Transition, RepositoryError> {
        let mut data = self.data.lock().await;
        step(
            &mut data.payments,
            reference,
            FulfillmentState::Pending,
            abandonment.target_state(),
            |record| match abandonment {
                PaymentAbandonment::Failed { reason, code } => {
                    record.failure_reason = Some(reason.clone());
                    record.failure_code.clone_from(code);
                }
                PaymentAbandonment::Canceled { reason } => {
                    record.canceled_reason = Some(reason.clone());
                }
            },
        )
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<OrderInsert, RepositoryError> {
        let mut data = self.data.lock().await;
        if let Some(existing) = data
            .orders
            .iter()
            .find(|o| o.payment_reference == order.payment_reference)
        {
            return Ok(OrderInsert::Existing(existing.clone()));
        }
        if data
            .orders
            .iter()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "order number {} already exists",
                order.order_number
            )));
        }
        data.orders.push(order.clone());
        Ok(OrderInsert::Created(order.clone()))
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data.orders.iter().find(|o| &o.id == id).cloned())
    }

    async fn get_by_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .orders
            .iter()
            .find(|o| &o.payment_reference == reference)
            .cloned())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn read_stock(&self, product_id: &ProductId) -> Result<Option<i64>, RepositoryError> {
        Ok(self.data.lock().await.stock.get(product_id).copied())
    }

    async fn conditional_decrement(
        &self,
        decrement: &StockDecrement,
    ) -> Result<DecrementOutcome, RepositoryError> {
        let mut data = self.data.lock().await;
        let Some(previous) = data.stock.get(&decrement.product_id).copied() else {
            return Ok(DecrementOutcome::ProductMissing);
        };

        let key = (decrement.order_id.clone(), decrement.product_id.clone());
        if !data.ledger_keys.insert(key) {
            return Ok(DecrementOutcome::AlreadyApplied);
        }

        let entry = decrement.ledger_entry(previous);
        data.stock
            .insert(decrement.product_id.clone(), entry.new_stock);
        data.ledger.push(entry.clone());
        Ok(DecrementOutcome::Applied(entry))
    }

    async fn set_stock(&self, product_id: &ProductId, stock: i64) -> Result<(), RepositoryError> {
        self.data
            .lock()
            .await
            .stock
            .insert(product_id.clone(), stock);
        Ok(())
    }

    async fn ledger_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<StockLedgerEntry>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .ledger
            .iter()
            .filter(|e| &e.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WebhookLogStore for MemoryStore {
    async fn append(&self, entry: &NewWebhookLog) -> Result<WebhookLog, RepositoryError> {
        let row = WebhookLog {
            id: WebhookLogId::generate(),
            event_id: entry.event_id.clone(),
            kind: entry.kind.clone(),
            gateway_created: entry.gateway_created,
            payload: entry.payload.clone(),
            processed: false,
            error: None,
            processed_at: None,
            error_at: None,
            received_at: Utc::now(),
        };
        self.data.lock().await.webhook_log.push(row.clone());
        Ok(row)
    }

    async fn mark_processed(&self, id: &WebhookLogId) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        let row = data
            .webhook_log
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or(RepositoryError::NotFound)?;
        row.processed = true;
        row.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_error(&self, id: &WebhookLogId, error: &str) -> Result<(), RepositoryError> {
        let mut data = self.data.lock().await;
        let row = data
            .webhook_log
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or(RepositoryError::NotFound)?;
        row.processed = false;
        row.error = Some(error.to_string());
        row.error_at = Some(Utc::now());
        Ok(())
    }

    async fn get(&self, id: &WebhookLogId) -> Result<Option<WebhookLog>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data.webhook_log.iter().find(|r| &r.id == id).cloned())
    }

    async fn backlog(&self, limit: i64) -> Result<Vec<WebhookLog>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .webhook_log
            .iter()
            .filter(|r| !r.processed)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn for_event(&self, event_id: &str) -> Result<Vec<WebhookLog>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .webhook_log
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FailureStore for MemoryStore {
    async fn record(&self, failure: &PaymentFailure) -> Result<(), RepositoryError> {
        self.data.lock().await.failures.push(failure.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<PaymentFailure>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .failures
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn for_user(&self, user_id: &UserId) -> Result<Vec<PaymentFailure>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .failures
            .iter()
            .rev()
            .filter(|f| f.user_id.as_ref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn for_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Vec<PaymentFailure>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data
            .failures
            .iter()
            .rev()
            .filter(|f| &f.payment_reference == reference)
            .cloned()
            .collect())
    }
}
