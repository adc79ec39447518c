//! Webhook delivery: signature checks, redelivery, failures and cancels.

#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;

use lux_core::{CartId, CartStatus, FulfillmentState, PaymentReference};
use lux_integration_tests::{TestApp, event, intent, line, sign, test_config};

/// Cart `cart-1` with two units priced at 100, authorized as `pi_test_1`.
async fn authorized_app() -> (TestApp, PaymentReference) {
    let app = TestApp::new();
    app.set_stock("miner-s19", 10).await;
    app.put_cart("cart-1", Some("user-1"), vec![line("miner-s19", 2, "100", None)])
        .await;
    let reference = app.authorize("cart-1", "user-1").await;
    (app, PaymentReference::new(reference))
}

fn succeeded(event_id: &str) -> serde_json::Value {
    event(
        event_id,
        "payment_intent.succeeded",
        intent("pi_test_1", 25204, "cart-1", "user-1"),
    )
}

fn failed(event_id: &str) -> serde_json::Value {
    let mut object = intent("pi_test_1", 25204, "cart-1", "user-1");
    object["amount_received"] = json!(0);
    object["last_payment_error"] = json!({
        "message": "Your card was declined.",
        "code": "card_declined",
    });
    event(event_id, "payment_intent.payment_failed", object)
}

// ============================================================================
// Authenticity
// ============================================================================

#[tokio::test]
async fn test_missing_signature_is_rejected_without_logging() {
    let app = TestApp::new();

    let resp = app.deliver_raw(succeeded("evt_1").to_string(), None).await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.text(), "Missing Stripe signature");
    assert!(app.stores.webhook_log.for_event("evt_1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tampered_body_is_rejected_without_logging() {
    let app = TestApp::new();
    let original = succeeded("evt_1").to_string();
    let signature = sign(original.as_bytes(), chrono::Utc::now().timestamp());
    let tampered = original.replace("25204", "1");

    let resp = app.deliver_raw(tampered, Some(&signature)).await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.text().starts_with("Webhook Error: "), "{}", resp.text());
    assert!(app.stores.webhook_log.for_event("evt_1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_signature_is_rejected() {
    let app = TestApp::new();
    let payload = succeeded("evt_1").to_string();
    let an_hour_ago = chrono::Utc::now().timestamp() - 3600;

    let resp = app
        .deliver_raw(payload.clone(), Some(&sign(payload.as_bytes(), an_hour_ago)))
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.text().starts_with("Webhook Error: "));
}

#[tokio::test]
async fn test_unsigned_config_cannot_accept_deliveries() {
    let mut config = test_config();
    config.payments.webhook_secret = None;
    let app = TestApp::with_config(config);

    let resp = app.deliver(&succeeded("evt_1")).await;

    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text(), "Webhook secret not configured");
}

#[tokio::test]
async fn test_only_post_is_routed() {
    let app = TestApp::new();

    let resp = app
        .send(
            Request::builder()
                .method(Method::GET)
                .uri("/webhooks/payments")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test]
async fn test_redelivered_success_settles_once() {
    let (app, reference) = authorized_app().await;

    let first = app.deliver(&succeeded("evt_1")).await;
    let second = app.deliver(&succeeded("evt_1")).await;
    let third = app.deliver(&succeeded("evt_1_retry")).await;

    for resp in [&first, &second, &third] {
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    }

    let order = app
        .stores
        .orders
        .get_by_payment(&reference)
        .await
        .unwrap()
        .expect("one order");
    let ledger = app.stores.inventory.ledger_for_order(&order.id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(app.stock("miner-s19").await, 8);

    // Every delivery is logged and marked processed.
    let rows = app.stores.webhook_log.for_event("evt_1").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.processed && row.error.is_none()));
}

#[tokio::test]
async fn test_unknown_payment_is_acknowledged_and_logged_with_error() {
    let app = TestApp::new();

    let resp = app
        .deliver(&event(
            "evt_orphan",
            "payment_intent.succeeded",
            intent("pi_unknown", 1000, "cart-x", "user-x"),
        ))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let rows = app.stores.webhook_log.for_event("evt_orphan").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].processed);
    assert!(rows[0].error.is_some());

    let backlog = app.stores.webhook_log.backlog(10).await.unwrap();
    assert_eq!(backlog.len(), 1);
}

#[tokio::test]
async fn test_unhandled_event_type_is_acknowledged() {
    let app = TestApp::new();

    let resp = app
        .deliver(&event("evt_charge", "charge.refunded", json!({ "id": "ch_1" })))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let rows = app.stores.webhook_log.for_event("evt_charge").await.unwrap();
    assert!(rows[0].processed);
}

// ============================================================================
// Failure and cancellation
// ============================================================================

#[tokio::test]
async fn test_failed_payment_records_one_failure_and_touches_nothing_else() {
    let (app, reference) = authorized_app().await;

    assert_eq!(app.deliver(&failed("evt_f1")).await.status, StatusCode::OK);
    assert_eq!(app.deliver(&failed("evt_f1")).await.status, StatusCode::OK);

    let record = app.stores.payments.get(&reference).await.unwrap().unwrap();
    assert_eq!(record.state, FulfillmentState::Failed);
    assert_eq!(record.failure_code.as_deref(), Some("card_declined"));

    let failures = app.stores.failures.for_payment(&reference).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].failure_reason, "Your card was declined.");
    assert_eq!(failures[0].amount.to_string(), "252.04");
    assert!(failures[0].webhook_log_id.is_some());

    assert!(app.stores.orders.get_by_payment(&reference).await.unwrap().is_none());
    assert_eq!(app.stock("miner-s19").await, 10);
    let cart = app.stores.carts.get(&CartId::new("cart-1")).await.unwrap().unwrap();
    assert_eq!(cart.status, CartStatus::Open);
}

#[tokio::test]
async fn test_success_after_failure_is_not_fulfilled() {
    let (app, reference) = authorized_app().await;

    app.deliver(&failed("evt_f1")).await;
    let resp = app.deliver(&succeeded("evt_s1")).await;

    assert_eq!(resp.status, StatusCode::OK);
    let rows = app.stores.webhook_log.for_event("evt_s1").await.unwrap();
    assert!(rows[0].error.is_some());
    assert!(app.stores.orders.get_by_payment(&reference).await.unwrap().is_none());
    assert_eq!(app.stock("miner-s19").await, 10);
}

#[tokio::test]
async fn test_cancel_is_final() {
    let (app, reference) = authorized_app().await;

    let mut object = intent("pi_test_1", 25204, "cart-1", "user-1");
    object["cancellation_reason"] = json!("abandoned");
    let resp = app
        .deliver(&event("evt_c1", "payment_intent.canceled", object))
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let record = app.stores.payments.get(&reference).await.unwrap().unwrap();
    assert_eq!(record.state, FulfillmentState::Canceled);
    assert_eq!(record.canceled_reason.as_deref(), Some("abandoned"));

    app.deliver(&succeeded("evt_s1")).await;
    assert!(app.stores.orders.get_by_payment(&reference).await.unwrap().is_none());
}
