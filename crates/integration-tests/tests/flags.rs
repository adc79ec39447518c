//! Behavior with the payments flag switched off.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;

use lux_integration_tests::{TestApp, event, intent, line, test_config};

fn disabled_app() -> TestApp {
    let mut config = test_config();
    config.flags.payments = false;
    TestApp::with_config(config)
}

#[tokio::test]
async fn test_webhook_is_acknowledged_but_not_processed() {
    let app = disabled_app();

    let resp = app
        .deliver(&event(
            "evt_1",
            "payment_intent.succeeded",
            intent("pi_1", 1000, "cart-1", "user-1"),
        ))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "payments disabled");
    assert!(app.stores.webhook_log.for_event("evt_1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checkout_calls_fail_precondition() {
    let app = disabled_app();
    app.put_cart("cart-1", Some("user-1"), vec![line("rig", 1, "100", None)])
        .await;
    let cookie = app.sign_in("user-1").await;

    let reprice = app
        .post_json(
            "/api/checkout/reprice",
            &json!({ "cartId": "cart-1", "address": { "country": "US" } }),
            None,
        )
        .await;
    assert_eq!(reprice.json()["error"]["code"], "failed-precondition");

    let authorize = app
        .post_json(
            "/api/checkout/payment-intent",
            &json!({ "cartId": "cart-1" }),
            Some(&cookie),
        )
        .await;
    assert_eq!(authorize.status, StatusCode::BAD_REQUEST);
    assert_eq!(authorize.json()["error"]["code"], "failed-precondition");
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_health_ignores_the_flag() {
    let app = disabled_app();

    let resp = app
        .send(
            axum::http::Request::builder()
                .uri("/health/ready")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
}
