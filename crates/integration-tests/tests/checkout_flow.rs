//! Reprice, authorize and settle a cart through the HTTP surface.

use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde_json::json;

use lux_core::{CartId, CartStatus, FulfillmentState, OrderStatus, PaymentReference};
use lux_integration_tests::{TestApp, event, intent, line};

fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal")
}

// ============================================================================
// Reprice
// ============================================================================

#[tokio::test]
async fn test_reprice_two_units_to_california() {
    let app = TestApp::new();
    app.put_cart("cart-1", Some("user-1"), vec![line("miner-s19", 2, "100", None)])
        .await;

    let resp = app
        .post_json(
            "/api/checkout/reprice",
            &json!({ "cartId": "cart-1", "address": { "country": "US", "region": "CA" } }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    let body = resp.json();
    assert_eq!(body["totals"]["subtotal"], json!(200.0));
    assert_eq!(body["totals"]["shipping"], json!(35.0));
    assert_eq!(body["totals"]["tax"], json!(17.04));
    assert_eq!(body["totals"]["total"], json!(252.04));
    assert_eq!(body["totals"]["currency"], "USD");

    let methods = body["shippingMethods"].as_array().expect("shipping methods");
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0]["id"], "standard");
    assert_eq!(methods[1]["id"], "express");

    let cart = app
        .stores
        .carts
        .get(&CartId::new("cart-1"))
        .await
        .expect("read cart")
        .expect("cart exists");
    assert_eq!(cart.totals.total, dec("252.04"));
    assert_eq!(cart.address.map(|a| a.country), Some("US".to_string()));
}

#[tokio::test]
async fn test_reprice_errors_use_structured_codes() {
    let app = TestApp::new();
    app.put_cart("empty", None, Vec::new()).await;

    let missing_address = app
        .post_json("/api/checkout/reprice", &json!({ "cartId": "empty" }), None)
        .await;
    assert_eq!(missing_address.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing_address.json()["error"]["code"], "invalid-argument");

    let unknown = app
        .post_json(
            "/api/checkout/reprice",
            &json!({ "cartId": "nope", "address": { "country": "US" } }),
            None,
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(unknown.json()["error"]["code"], "not-found");

    let empty = app
        .post_json(
            "/api/checkout/reprice",
            &json!({ "cartId": "empty", "address": { "country": "US" } }),
            None,
        )
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.json()["error"]["message"], "Cart is empty");
}

#[tokio::test]
async fn test_mistyped_body_is_invalid_argument() {
    let app = TestApp::new();

    let reprice = app
        .post_json(
            "/api/checkout/reprice",
            &json!({ "cartId": 5, "address": { "country": "US" } }),
            None,
        )
        .await;
    assert_eq!(reprice.status, StatusCode::BAD_REQUEST);
    assert_eq!(reprice.json()["error"]["code"], "invalid-argument");

    let cookie = app.sign_in("u-1").await;
    let intent = app
        .post_json(
            "/api/checkout/payment-intent",
            &json!({ "cartId": ["cart-1"] }),
            Some(&cookie),
        )
        .await;
    assert_eq!(intent.status, StatusCode::BAD_REQUEST);
    assert_eq!(intent.json()["error"]["code"], "invalid-argument");
}

// ============================================================================
// Payment authorization
// ============================================================================

#[tokio::test]
async fn test_payment_intent_requires_sign_in() {
    let app = TestApp::new();
    app.put_cart("cart-1", Some("user-1"), vec![line("miner-s19", 1, "100", None)])
        .await;

    let resp = app
        .post_json("/api/checkout/payment-intent", &json!({ "cartId": "cart-1" }), None)
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json()["error"]["code"], "unauthenticated");
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_payment_intent_rejects_another_users_cart() {
    let app = TestApp::new();
    app.put_cart("cart-1", Some("owner"), vec![line("miner-s19", 1, "100", None)])
        .await;
    app.post_json(
        "/api/checkout/reprice",
        &json!({ "cartId": "cart-1", "address": { "country": "US" } }),
        None,
    )
    .await;

    let cookie = app.sign_in("intruder").await;
    let resp = app
        .post_json(
            "/api/checkout/payment-intent",
            &json!({ "cartId": "cart-1" }),
            Some(&cookie),
        )
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.json()["error"]["code"], "permission-denied");
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_unpriced_cart_cannot_be_authorized() {
    let app = TestApp::new();
    app.put_cart("cart-1", Some("user-1"), vec![line("miner-s19", 1, "100", None)])
        .await;
    let cookie = app.sign_in("user-1").await;

    let resp = app
        .post_json(
            "/api/checkout/payment-intent",
            &json!({ "cartId": "cart-1" }),
            Some(&cookie),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.json()["error"]["code"], "invalid-argument");
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_reprice_authorize_and_settle() {
    let app = TestApp::new();
    app.set_stock("miner-s19", 5).await;
    app.put_cart("cart-1", Some("user-1"), vec![line("miner-s19", 2, "100", None)])
        .await;

    let priced = app
        .post_json(
            "/api/checkout/reprice",
            &json!({ "cartId": "cart-1", "address": { "country": "US", "region": "CA" } }),
            None,
        )
        .await;
    assert_eq!(priced.status, StatusCode::OK);

    let cookie = app.sign_in("user-1").await;
    let authorized = app
        .post_json(
            "/api/checkout/payment-intent",
            &json!({ "cartId": "cart-1", "orderId": "client-hint-7" }),
            Some(&cookie),
        )
        .await;
    assert_eq!(authorized.status, StatusCode::OK, "{}", authorized.text());
    let body = authorized.json();
    assert_eq!(body["paymentReference"], "pi_test_1");
    assert_eq!(body["clientSecret"], "pi_test_1_secret_1");
    assert_eq!(body["amount"], json!(252.04));
    assert_eq!(body["currency"], "USD");

    let requests = app.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount_minor, 25204);
    assert_eq!(requests[0].metadata.get("cartId").map(String::as_str), Some("cart-1"));
    assert_eq!(requests[0].metadata.get("userId").map(String::as_str), Some("user-1"));
    assert_eq!(
        requests[0].metadata.get("orderId").map(String::as_str),
        Some("client-hint-7")
    );

    let delivered = app
        .deliver(&event(
            "evt_1",
            "payment_intent.succeeded",
            intent("pi_test_1", 25204, "cart-1", "user-1"),
        ))
        .await;
    assert_eq!(delivered.status, StatusCode::OK, "{}", delivered.text());
    assert_eq!(delivered.json(), json!({ "received": true }));

    let reference = PaymentReference::new("pi_test_1");
    let record = app
        .stores
        .payments
        .get(&reference)
        .await
        .expect("read payment")
        .expect("payment exists");
    assert_eq!(record.state, FulfillmentState::CartClosed);
    assert_eq!(record.settled_amount, Some(dec("252.04")));

    let order = app
        .stores
        .orders
        .get_by_payment(&reference)
        .await
        .expect("read order")
        .expect("order exists");
    assert!(order.order_number.as_str().starts_with("LUX-"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.totals.total, dec("252.04"));
    assert_eq!(record.order_id.as_ref(), Some(&order.id));

    assert_eq!(app.stock("miner-s19").await, 3);
    let ledger = app
        .stores
        .inventory
        .ledger_for_order(&order.id)
        .await
        .expect("read ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].delta, -2);
    assert_eq!((ledger[0].previous_stock, ledger[0].new_stock), (5, 3));

    let cart = app
        .stores
        .carts
        .get(&CartId::new("cart-1"))
        .await
        .expect("read cart")
        .expect("cart exists");
    assert_eq!(cart.status, CartStatus::Completed);
    assert_eq!(cart.order_id, Some(order.id));
}
