//! HTTP route handlers for checkout.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - Liveness
//! GET  /health/ready                - Readiness (database)
//!
//! # Checkout (JSON RPC)
//! POST /api/checkout/reprice        - Shipping options and totals
//! POST /api/checkout/payment-intent - Payment authorization (requires auth)
//!
//! # Gateway
//! POST /webhooks/payments           - Signed payment events
//! ```

pub mod checkout;
pub mod health;
pub mod webhooks;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::middleware::payments_webhook_guard;
use crate::state::AppState;

/// Create the checkout RPC router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/reprice", post(checkout::reprice))
        .route("/payment-intent", post(checkout::create_payment_intent))
}

/// Create the webhook router, guarded by the payments flag.
pub fn webhook_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/payments", post(webhooks::receive))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            payments_webhook_guard,
        ))
}

/// Create all routes.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api/checkout", checkout_routes())
        .nest("/webhooks", webhook_routes(state))
}
