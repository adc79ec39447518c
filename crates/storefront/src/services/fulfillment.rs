//! Webhook-driven fulfillment.
//!
//! A payment record moves through
//! `Pending -> Succeeded -> OrderCreated -> StockApplied -> CartClosed`, or from
//! `Pending` to `Failed` or `Canceled`. Every step is a conditional write, so a
//! duplicate or retried settlement event either no-ops or resumes from the stage
//! the previous attempt reached. Side effects are keyed so they cannot repeat:
//!
//! - one order per payment reference
//! - one ledger entry per (order, product)
//! - cart completion is tied to a single order

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use lux_core::{
    CartId, FulfillmentState, OrderId, OrderStatus, PaymentReference, ProductId, UserId,
    WebhookLogId, from_minor_units,
};

use crate::db::{RepositoryError, Stores};
use crate::models::{
    Cart, DecrementOutcome, EventKind, GatewayEvent, Order, OrderNumber, PaymentAbandonment,
    PaymentIntentObject, PaymentRecord, StockDecrement, Transition,
};
use crate::services::failures::{FailureRecorder, FailureReport};

/// Order number draws before giving up on a collision streak.
const MAX_ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Errors from handling a payment event.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The event object is not a payment intent.
    #[error("malformed payment intent: {0}")]
    MalformedIntent(String),

    /// Settlement events must carry the cart and user they were created for.
    #[error("payment intent is missing {0} metadata")]
    MissingMetadata(&'static str),

    #[error("no payment record for {0}")]
    PaymentNotFound(PaymentReference),

    #[error("cart {0} not found")]
    CartNotFound(CartId),

    /// The record is in a state the event cannot move it out of.
    #[error("payment {reference} is {state}; {event} ignored")]
    Terminal {
        reference: PaymentReference,
        state: FulfillmentState,
        event: &'static str,
    },

    #[error("no unique order number after {0} attempts")]
    OrderNumberExhausted(usize),

    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// Settlement ran to completion. `created` is false when the order already
    /// existed from an earlier partial attempt.
    Fulfilled {
        order_id: OrderId,
        order_number: String,
        created: bool,
    },
    /// The record was already fully fulfilled; nothing changed.
    AlreadyFulfilled { order_id: OrderId },
    /// The record was marked failed (`recorded` is false on a replay).
    Failed { recorded: bool },
    /// The record was marked canceled (`applied` is false on a replay).
    Canceled { applied: bool },
    /// Event kind the pipeline does not act on.
    Ignored(String),
}

/// Turns payment events into orders, stock changes and cart closure.
pub struct FulfillmentOrchestrator {
    stores: Stores,
    failures: FailureRecorder,
    order_prefix: String,
}

impl FulfillmentOrchestrator {
    #[must_use]
    pub fn new(stores: Stores, failures: FailureRecorder, order_prefix: impl Into<String>) -> Self {
        Self {
            stores,
            failures,
            order_prefix: order_prefix.into(),
        }
    }

    /// Dispatch a verified event by kind.
    ///
    /// # Errors
    ///
    /// Returns `FulfillmentError` if the event cannot be applied. Steps already
    /// committed stay committed; a replay resumes from there.
    #[instrument(skip(self, event), fields(event_id = %event.id, kind = %event.kind))]
    pub async fn handle(
        &self,
        event: &GatewayEvent,
        log_id: &WebhookLogId,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        let kind = event.event_kind();
        if let EventKind::Other(kind) = kind {
            debug!("Event acknowledged without action");
            return Ok(FulfillmentOutcome::Ignored(kind));
        }

        let intent = event
            .payment_intent()
            .map_err(|e| FulfillmentError::MalformedIntent(e.to_string()))?;

        match kind {
            EventKind::PaymentSucceeded => self.settle(&intent, log_id).await,
            EventKind::PaymentFailed => self.fail(&intent, log_id).await,
            EventKind::PaymentCanceled => self.cancel(&intent).await,
            EventKind::Other(kind) => Ok(FulfillmentOutcome::Ignored(kind)),
        }
    }

    /// Settle a payment: order, stock, cart.
    #[instrument(skip(self, intent, log_id), fields(payment_reference = %intent.id))]
    async fn settle(
        &self,
        intent: &PaymentIntentObject,
        log_id: &WebhookLogId,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        intent
            .metadata_value("cartId")
            .ok_or(FulfillmentError::MissingMetadata("cartId"))?;
        intent
            .metadata_value("userId")
            .ok_or(FulfillmentError::MissingMetadata("userId"))?;

        let reference = PaymentReference::new(intent.id.clone());
        let record = self.load_record(&reference).await?;

        if let Some(order_id) = record.order_id.clone().filter(|_| record.is_fulfilled()) {
            info!(order_id = %order_id, "Payment already fulfilled");
            return Ok(FulfillmentOutcome::AlreadyFulfilled { order_id });
        }
        if record.state.is_abandoned() {
            return Err(terminal(&record, "settlement"));
        }

        let settled = from_minor_units(intent.settled_minor());
        let transition = self
            .stores
            .payments
            .mark_succeeded(&reference, settled)
            .await?;
        check(&reference, transition, "settlement")?;

        let (order, created) = match self.stores.orders.get_by_payment(&reference).await? {
            Some(order) => (order, false),
            None => {
                let cart = self.load_cart(&record.cart_id).await?;
                self.create_order(&record, &cart, intent, log_id).await?
            }
        };

        let transition = self
            .stores
            .payments
            .record_order(&reference, &order.id, order.order_number.as_str())
            .await?;
        check(&reference, transition, "settlement")?;

        if !record.state.has_reached(FulfillmentState::StockApplied) {
            self.apply_stock(&order).await?;
        }
        let transition = self.stores.payments.mark_stock_applied(&reference).await?;
        check(&reference, transition, "settlement")?;

        if self
            .stores
            .carts
            .complete(&order.cart_id, &order.id)
            .await?
        {
            debug!(cart_id = %order.cart_id, "Cart completed");
        }
        let transition = self.stores.payments.mark_cart_closed(&reference).await?;
        check(&reference, transition, "settlement")?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            created,
            "Payment fulfilled"
        );

        Ok(FulfillmentOutcome::Fulfilled {
            order_id: order.id,
            order_number: order.order_number.to_string(),
            created,
        })
    }

    async fn create_order(
        &self,
        record: &PaymentRecord,
        cart: &Cart,
        intent: &PaymentIntentObject,
        log_id: &WebhookLogId,
    ) -> Result<(Order, bool), FulfillmentError> {
        let now = Utc::now();

        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            let order_number =
                OrderNumber::generate(&self.order_prefix, now.date_naive(), &mut rand::rng());

            let order = Order {
                id: OrderId::generate(),
                order_number,
                user_id: record.user_id.clone(),
                cart_id: record.cart_id.clone(),
                payment_reference: record.reference.clone(),
                items: cart.items.clone(),
                totals: cart.totals.clone(),
                shipping_method: cart.shipping_method.unwrap_or_default(),
                shipping_address: cart.address.clone(),
                status: OrderStatus::Pending,
                tracking_number: None,
                paid_at: intent.created_at().unwrap_or(now),
                webhook_log_id: Some(log_id.clone()),
                created_at: now,
            };

            match self.stores.orders.insert(&order).await {
                Ok(insert) => {
                    let created = insert.is_created();
                    return Ok((insert.into_order(), created));
                }
                Err(RepositoryError::Conflict(reason)) => {
                    warn!(attempt, reason = %reason, "Order number collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FulfillmentError::OrderNumberExhausted(MAX_ORDER_NUMBER_ATTEMPTS))
    }

    /// Decrement stock for every product in the order, in parallel per product.
    async fn apply_stock(&self, order: &Order) -> Result<(), FulfillmentError> {
        let decrements = aggregate(order);
        let inventory = &self.stores.inventory;

        let results = join_all(
            decrements
                .iter()
                .map(|decrement| inventory.conditional_decrement(decrement)),
        )
        .await;

        for (decrement, result) in decrements.iter().zip(results) {
            match result? {
                DecrementOutcome::Applied(entry) => debug!(
                    product_id = %entry.product_id,
                    previous = entry.previous_stock,
                    new = entry.new_stock,
                    "Stock decremented"
                ),
                DecrementOutcome::AlreadyApplied => debug!(
                    product_id = %decrement.product_id,
                    "Stock already decremented for order"
                ),
                DecrementOutcome::ProductMissing => warn!(
                    product_id = %decrement.product_id,
                    "Product not in catalog, stock unchanged"
                ),
            }
        }

        Ok(())
    }

    #[instrument(skip(self, intent, log_id), fields(payment_reference = %intent.id))]
    async fn fail(
        &self,
        intent: &PaymentIntentObject,
        log_id: &WebhookLogId,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        let reference = PaymentReference::new(intent.id.clone());
        let record = self.load_record(&reference).await?;

        let reason = intent.failure_reason();
        let code = intent.failure_code();
        let abandonment = PaymentAbandonment::Failed {
            reason: reason.clone(),
            code: code.clone(),
        };

        let transition = self.stores.payments.abandon(&reference, &abandonment).await?;
        if !check(&reference, transition, "failure")? {
            return Ok(FulfillmentOutcome::Failed { recorded: false });
        }

        let user_id = intent
            .metadata_value("userId")
            .map(UserId::new)
            .or(Some(record.user_id));

        self.failures
            .record(FailureReport {
                payment_reference: reference,
                user_id,
                amount: from_minor_units(intent.amount),
                currency: intent.currency.clone(),
                reason,
                code,
                webhook_log_id: Some(log_id.clone()),
            })
            .await?;

        warn!(reason = %intent.failure_reason(), "Payment failed");
        Ok(FulfillmentOutcome::Failed { recorded: true })
    }

    #[instrument(skip(self, intent), fields(payment_reference = %intent.id))]
    async fn cancel(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        let reference = PaymentReference::new(intent.id.clone());
        self.load_record(&reference).await?;

        let abandonment = PaymentAbandonment::Canceled {
            reason: intent.canceled_reason(),
        };
        let transition = self.stores.payments.abandon(&reference, &abandonment).await?;
        let applied = check(&reference, transition, "cancellation")?;

        if applied {
            info!(reason = %intent.canceled_reason(), "Payment canceled");
        }
        Ok(FulfillmentOutcome::Canceled { applied })
    }

    async fn load_record(
        &self,
        reference: &PaymentReference,
    ) -> Result<PaymentRecord, FulfillmentError> {
        self.stores
            .payments
            .get(reference)
            .await?
            .ok_or_else(|| FulfillmentError::PaymentNotFound(reference.clone()))
    }

    async fn load_cart(&self, id: &CartId) -> Result<Cart, FulfillmentError> {
        self.stores
            .carts
            .get(id)
            .await?
            .ok_or_else(|| FulfillmentError::CartNotFound(id.clone()))
    }
}

/// One decrement per product, quantities summed across lines.
fn aggregate(order: &Order) -> Vec<StockDecrement> {
    let mut quantities: BTreeMap<&ProductId, i64> = BTreeMap::new();
    for item in &order.items {
        *quantities.entry(&item.product_id).or_default() += i64::from(item.quantity);
    }

    quantities
        .into_iter()
        .map(|(product_id, quantity)| StockDecrement {
            product_id: product_id.clone(),
            order_id: order.id.clone(),
            order_number: order.order_number.to_string(),
            quantity,
        })
        .collect()
}

/// `Ok(true)` if applied, `Ok(false)` if already there, `Terminal` if rejected.
fn check(
    reference: &PaymentReference,
    transition: Transition,
    event: &'static str,
) -> Result<bool, FulfillmentError> {
    match transition {
        Transition::Applied => Ok(true),
        Transition::AlreadyInState => Ok(false),
        Transition::Rejected(state) => Err(FulfillmentError::Terminal {
            reference: reference.clone(),
            state,
            event,
        }),
    }
}

fn terminal(record: &PaymentRecord, event: &'static str) -> FulfillmentError {
    FulfillmentError::Terminal {
        reference: record.reference.clone(),
        state: record.state,
        event,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use lux_core::{CartStatus, CurrencyCode};

    use super::*;
    use crate::db::{CartStore, FailureStore, InventoryStore, OrderStore, PaymentStore};
    use crate::models::{LineItem, PaymentMetadata};

    const REFERENCE: &str = "pi_test_1";

    fn line(product: &str, quantity: u32) -> LineItem {
        LineItem {
            product_id: ProductId::new(product),
            quantity,
            unit_price: Decimal::from(100),
            weight_kg: None,
            name: None,
            sku: None,
        }
    }

    async fn seeded(items: Vec<LineItem>) -> (FulfillmentOrchestrator, Stores) {
        let stores = Stores::in_memory();

        let mut cart = Cart::new(
            CartId::new("cart-1"),
            Some(UserId::new("user-1")),
            CurrencyCode::USD,
        );
        cart.items = items;
        cart.totals.total = Decimal::new(25204, 2);
        stores.carts.put(&cart).await.unwrap();

        let now = Utc::now();
        stores
            .payments
            .insert(&PaymentRecord {
                reference: PaymentReference::new(REFERENCE),
                cart_id: cart.id.clone(),
                user_id: UserId::new("user-1"),
                amount: cart.totals.total,
                currency: CurrencyCode::USD,
                client_secret: "secret".to_string(),
                metadata: PaymentMetadata {
                    cart_id: cart.id.clone(),
                    user_id: UserId::new("user-1"),
                    item_count: 1,
                    subtotal: Decimal::from(200),
                    shipping: Decimal::from(35),
                    tax: Decimal::new(1704, 2),
                    order_id: None,
                },
                state: FulfillmentState::Pending,
                settled_amount: None,
                order_id: None,
                order_number: None,
                failure_reason: None,
                failure_code: None,
                canceled_reason: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let orchestrator = FulfillmentOrchestrator::new(
            stores.clone(),
            FailureRecorder::new(stores.failures.clone()),
            "LUX",
        );
        (orchestrator, stores)
    }

    fn event(kind: &str, object: serde_json::Value) -> GatewayEvent {
        serde_json::from_value(json!({
            "id": format!("evt_{kind}"),
            "type": kind,
            "created": 1_767_225_600,
            "data": {"object": object},
        }))
        .unwrap()
    }

    fn succeeded() -> GatewayEvent {
        event(
            "payment_intent.succeeded",
            json!({
                "id": REFERENCE,
                "amount": 25204,
                "amount_received": 25204,
                "currency": "usd",
                "created": 1_767_225_000,
                "metadata": {"cartId": "cart-1", "userId": "user-1"},
            }),
        )
    }

    fn failed() -> GatewayEvent {
        event(
            "payment_intent.payment_failed",
            json!({
                "id": REFERENCE,
                "amount": 25204,
                "currency": "usd",
                "metadata": {"cartId": "cart-1", "userId": "user-1"},
                "last_payment_error": {"message": "Your card was declined.", "code": "card_declined"},
            }),
        )
    }

    fn log_id() -> WebhookLogId {
        WebhookLogId::new("log-1")
    }

    #[tokio::test]
    async fn test_settlement_creates_order_decrements_stock_and_closes_cart() {
        let (orchestrator, stores) = seeded(vec![line("p1", 2), line("p2", 1), line("p1", 1)]).await;
        stores.inventory.set_stock(&ProductId::new("p1"), 10).await.unwrap();
        stores.inventory.set_stock(&ProductId::new("p2"), 1).await.unwrap();

        let outcome = orchestrator.handle(&succeeded(), &log_id()).await.unwrap();
        let FulfillmentOutcome::Fulfilled { order_id, order_number, created } = outcome else {
            panic!("expected fulfillment");
        };
        assert!(created);
        assert!(order_number.starts_with("LUX-"));

        let record = stores
            .payments
            .get(&PaymentReference::new(REFERENCE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, FulfillmentState::CartClosed);
        assert_eq!(record.order_id.as_ref(), Some(&order_id));
        assert_eq!(record.settled_amount, Some(Decimal::new(25204, 2)));

        let order = stores.orders.get(&order_id).await.unwrap().unwrap();
        assert_eq!(order.paid_at.timestamp(), 1_767_225_000);
        assert_eq!(order.webhook_log_id, Some(log_id()));

        // p1 lines are aggregated into one decrement
        let ledger = stores.inventory.ledger_for_order(&order_id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(stores.inventory.read_stock(&ProductId::new("p1")).await.unwrap(), Some(7));
        assert_eq!(stores.inventory.read_stock(&ProductId::new("p2")).await.unwrap(), Some(0));

        let cart = stores.carts.get(&CartId::new("cart-1")).await.unwrap().unwrap();
        assert_eq!(cart.status, CartStatus::Completed);
        assert_eq!(cart.order_id, Some(order_id));
    }

    #[tokio::test]
    async fn test_replayed_settlement_is_a_no_op() {
        let (orchestrator, stores) = seeded(vec![line("p1", 2)]).await;
        stores.inventory.set_stock(&ProductId::new("p1"), 5).await.unwrap();

        let first = orchestrator.handle(&succeeded(), &log_id()).await.unwrap();
        let second = orchestrator.handle(&succeeded(), &log_id()).await.unwrap();

        let FulfillmentOutcome::Fulfilled { order_id, .. } = first else {
            panic!("expected fulfillment");
        };
        assert_eq!(second, FulfillmentOutcome::AlreadyFulfilled { order_id: order_id.clone() });
        assert_eq!(stores.inventory.read_stock(&ProductId::new("p1")).await.unwrap(), Some(3));
        assert_eq!(stores.inventory.ledger_for_order(&order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_settlements_create_one_order() {
        let (orchestrator, stores) = seeded(vec![line("p1", 2)]).await;
        stores.inventory.set_stock(&ProductId::new("p1"), 5).await.unwrap();

        let event = succeeded();
        let (first_log, second_log) = (log_id(), log_id());
        let (a, b) = tokio::join!(
            orchestrator.handle(&event, &first_log),
            orchestrator.handle(&event, &second_log),
        );
        assert!(a.is_ok() && b.is_ok());

        let order = stores
            .orders
            .get_by_payment(&PaymentReference::new(REFERENCE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stores.inventory.ledger_for_order(&order.id).await.unwrap().len(), 1);
        assert_eq!(stores.inventory.read_stock(&ProductId::new("p1")).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_settlement_resumes_after_partial_attempt() {
        let (orchestrator, stores) = seeded(vec![line("p1", 1)]).await;
        stores.inventory.set_stock(&ProductId::new("p1"), 4).await.unwrap();
        let reference = PaymentReference::new(REFERENCE);

        // A previous attempt got as far as marking the payment succeeded.
        stores
            .payments
            .mark_succeeded(&reference, Decimal::new(25204, 2))
            .await
            .unwrap();

        let outcome = orchestrator.handle(&succeeded(), &log_id()).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::Fulfilled { created: true, .. }));
        assert_eq!(stores.inventory.read_stock(&ProductId::new("p1")).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_missing_products_are_skipped() {
        let (orchestrator, stores) = seeded(vec![line("ghost", 1)]).await;
        let outcome = orchestrator.handle(&succeeded(), &log_id()).await.unwrap();
        let FulfillmentOutcome::Fulfilled { order_id, .. } = outcome else {
            panic!("expected fulfillment");
        };
        assert!(stores.inventory.ledger_for_order(&order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_requires_metadata() {
        let (orchestrator, _) = seeded(vec![line("p1", 1)]).await;
        let event = event(
            "payment_intent.succeeded",
            json!({"id": REFERENCE, "amount": 100, "metadata": {"cartId": "cart-1"}}),
        );
        let result = orchestrator.handle(&event, &log_id()).await;
        assert!(matches!(result, Err(FulfillmentError::MissingMetadata("userId"))));
    }

    #[tokio::test]
    async fn test_failure_marks_record_and_records_failure_once() {
        let (orchestrator, stores) = seeded(vec![line("p1", 1)]).await;
        stores.inventory.set_stock(&ProductId::new("p1"), 4).await.unwrap();
        let reference = PaymentReference::new(REFERENCE);

        let first = orchestrator.handle(&failed(), &log_id()).await.unwrap();
        let second = orchestrator.handle(&failed(), &log_id()).await.unwrap();
        assert_eq!(first, FulfillmentOutcome::Failed { recorded: true });
        assert_eq!(second, FulfillmentOutcome::Failed { recorded: false });

        let record = stores.payments.get(&reference).await.unwrap().unwrap();
        assert_eq!(record.state, FulfillmentState::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("Your card was declined."));

        let failures = stores.failures.for_payment(&reference).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].amount, Decimal::new(25204, 2));

        assert!(stores.orders.get_by_payment(&reference).await.unwrap().is_none());
        assert_eq!(stores.inventory.read_stock(&ProductId::new("p1")).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_settlement_after_failure_is_rejected() {
        let (orchestrator, stores) = seeded(vec![line("p1", 1)]).await;
        orchestrator.handle(&failed(), &log_id()).await.unwrap();

        let result = orchestrator.handle(&succeeded(), &log_id()).await;
        assert!(matches!(
            result,
            Err(FulfillmentError::Terminal { state: FulfillmentState::Failed, .. })
        ));
        let reference = PaymentReference::new(REFERENCE);
        assert!(stores.orders.get_by_payment(&reference).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_is_final() {
        let (orchestrator, stores) = seeded(vec![line("p1", 1)]).await;
        let canceled = event(
            "payment_intent.canceled",
            json!({"id": REFERENCE, "amount": 25204, "metadata": {}}),
        );

        let outcome = orchestrator.handle(&canceled, &log_id()).await.unwrap();
        assert_eq!(outcome, FulfillmentOutcome::Canceled { applied: true });

        let record = stores
            .payments
            .get(&PaymentReference::new(REFERENCE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, FulfillmentState::Canceled);
        assert_eq!(record.canceled_reason.as_deref(), Some("User canceled"));

        let late_failure = orchestrator.handle(&failed(), &log_id()).await;
        assert!(matches!(late_failure, Err(FulfillmentError::Terminal { .. })));
    }

    #[tokio::test]
    async fn test_unknown_kinds_are_ignored() {
        let (orchestrator, _) = seeded(Vec::new()).await;
        let outcome = orchestrator
            .handle(&event("charge.refunded", json!({})), &log_id())
            .await
            .unwrap();
        assert_eq!(outcome, FulfillmentOutcome::Ignored("charge.refunded".to_string()));
    }
}
