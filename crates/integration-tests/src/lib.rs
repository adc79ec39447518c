//! End-to-end checkout tests for Lux.
//!
//! The tests drive the real router in-process with in-memory stores, a fake
//! payment gateway and an in-memory session store. Webhook deliveries are
//! signed with the same scheme the gateway uses, so they pass through the
//! production verifier.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests
//! cargo test -p lux-integration-tests
//!
//! # Including the PostgreSQL store tests (needs a migrated database)
//! LUX_DATABASE_URL=postgres://... cargo test -p lux-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `checkout_flow` - Reprice, authorize and settle a cart
//! - `webhooks` - Signature checks, idempotent redelivery, failures, cancels
//! - `inventory` - Concurrent settlements against shared stock
//! - `flags` - Behavior with payments switched off

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode, header},
};
use secrecy::SecretString;
use sqlx::PgPool;
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_sessions::{
    MemoryStore, SessionStore,
    cookie::time::{Duration as CookieDuration, OffsetDateTime},
    session::{Id, Record},
};

use lux_core::{CartId, CurrencyCode, ProductId, UserId};
use lux_storefront::config::{CheckoutConfig, FeatureFlags, PaymentsConfig, StorefrontConfig};
use lux_storefront::db::Stores;
use lux_storefront::gateway::{
    CreatePaymentIntent, GatewayError, PaymentGateway, PaymentIntent, StripeSignatureVerifier,
    sign_payload,
};
use lux_storefront::middleware::session::{SESSION_COOKIE_NAME, configure};
use lux_storefront::models::{Cart, CurrentUser, LineItem, session::keys};
use lux_storefront::rates::RateTables;
use lux_storefront::routes::webhooks::SIGNATURE_HEADER;
use lux_storefront::state::{AppState, Dependencies};

/// Webhook signing secret used by [`test_config`].
pub const WEBHOOK_SECRET: &str = "whsec_Kq7vN2xR9pLm4Tz8Wc3Yb6Hd";

/// Configuration for an in-process app: payments on, webhook secret set.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        base_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from("k3Jq9xW2mZ7pR4vN8bT1cY6hL0sD5fGa"),
        payments: PaymentsConfig {
            secret_key: SecretString::from("sk_test_unused"),
            webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
            api_base: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(5),
            webhook_tolerance: Duration::from_secs(300),
        },
        checkout: CheckoutConfig::default(),
        flags: FeatureFlags::default(),
        sentry_dsn: None,
        sentry_environment: None,
        json_logs: false,
    }
}

/// Payment gateway double that hands out `<prefix>_<n>` references.
pub struct FakeGateway {
    prefix: String,
    issued: AtomicUsize,
    requests: Mutex<Vec<CreatePaymentIntent>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::with_prefix("pi_test")
    }
}

impl FakeGateway {
    /// Gateway whose references start with `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            issued: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    ///
    /// # Panics
    ///
    /// Panics if the request log lock is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<CreatePaymentIntent> {
        self.requests.lock().expect("request log lock").clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
    ) -> Result<PaymentIntent, GatewayError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .map_err(|e| GatewayError::Request(e.to_string()))?
            .push(request.clone());

        let reference = format!("{}_{n}", self.prefix);
        Ok(PaymentIntent {
            client_secret: format!("{reference}_secret_{n}"),
            reference: reference.into(),
            amount_minor: request.amount_minor,
            currency: request.currency.gateway_code(),
        })
    }
}

/// A response with its body read.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl TestResponse {
    /// Body as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }

    /// Body as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The router plus handles on everything behind it.
pub struct TestApp {
    pub router: Router,
    pub stores: Stores,
    pub sessions: MemoryStore,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    /// App with [`test_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// App with a custom configuration.
    #[must_use]
    pub fn with_config(config: StorefrontConfig) -> Self {
        Self::with_stores(config, Stores::in_memory(), None, FakeGateway::default())
    }

    /// App over `PostgreSQL` stores, with references unique to this run.
    ///
    /// # Panics
    ///
    /// Panics if `LUX_DATABASE_URL` is unset, the database is unreachable or
    /// migrations fail.
    pub async fn postgres() -> Self {
        let url = std::env::var("LUX_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .expect("LUX_DATABASE_URL set");
        let pool = lux_storefront::db::create_pool(&SecretString::from(url))
            .await
            .expect("connect to database");
        sqlx::migrate!("../storefront/migrations")
            .run(&pool)
            .await
            .expect("run migrations");

        let run = run_tag();
        Self::with_stores(
            test_config(),
            Stores::postgres(&pool),
            Some(pool),
            FakeGateway::with_prefix(format!("pi_{run}")),
        )
    }

    fn with_stores(
        config: StorefrontConfig,
        stores: Stores,
        pool: Option<PgPool>,
        gateway: FakeGateway,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let sessions = MemoryStore::default();

        let deps = Dependencies {
            stores: stores.clone(),
            pool,
            gateway: gateway.clone(),
            verifier: Arc::new(StripeSignatureVerifier::new(
                config.payments.webhook_tolerance,
            )),
            rate_tables: RateTables::default(),
        };
        let session_layer = configure(sessions.clone(), &config);
        let router = lux_storefront::app(AppState::new(config, deps), session_layer);

        Self {
            router,
            stores,
            sessions,
            gateway,
        }
    }

    /// Send a request through the router.
    ///
    /// # Panics
    ///
    /// Panics if the router or body read fails.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        TestResponse { status, body }
    }

    /// POST a JSON body, optionally with a session cookie.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built.
    pub async fn post_json(&self, path: &str, body: &Value, cookie: Option<&str>) -> TestResponse {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::from(body.to_string())).expect("request"))
            .await
    }

    /// Deliver a webhook event signed with [`WEBHOOK_SECRET`].
    pub async fn deliver(&self, event: &Value) -> TestResponse {
        let payload = event.to_string();
        let signature = sign(payload.as_bytes(), chrono::Utc::now().timestamp());
        self.deliver_raw(payload, Some(&signature)).await
    }

    /// Deliver a raw webhook body with an optional signature header.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built.
    pub async fn deliver_raw(&self, payload: String, signature: Option<&str>) -> TestResponse {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/payments")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        self.send(request.body(Body::from(payload)).expect("request"))
            .await
    }

    /// Price a cart for a US address and authorize it as its owner.
    ///
    /// Returns the payment reference.
    ///
    /// # Panics
    ///
    /// Panics if either call does not succeed.
    pub async fn authorize(&self, cart_id: &str, user_id: &str) -> String {
        let priced = self
            .post_json(
                "/api/checkout/reprice",
                &json!({ "cartId": cart_id, "address": { "country": "US", "region": "CA" } }),
                None,
            )
            .await;
        assert_eq!(priced.status, StatusCode::OK, "{}", priced.text());

        let cookie = self.sign_in(user_id).await;
        let authorized = self
            .post_json(
                "/api/checkout/payment-intent",
                &json!({ "cartId": cart_id }),
                Some(&cookie),
            )
            .await;
        assert_eq!(authorized.status, StatusCode::OK, "{}", authorized.text());
        authorized.json()["paymentReference"]
            .as_str()
            .expect("payment reference")
            .to_string()
    }

    /// Put a signed-in user into the session store and return the cookie.
    ///
    /// # Panics
    ///
    /// Panics if the session cannot be stored.
    pub async fn sign_in(&self, user_id: &str) -> String {
        let user = CurrentUser {
            id: UserId::new(user_id),
            email: Some(format!("{user_id}@example.com")),
        };
        let mut record = Record {
            id: Id::default(),
            data: HashMap::from([(
                keys::CURRENT_USER.to_string(),
                serde_json::to_value(&user).expect("user serializes"),
            )]),
            expiry_date: OffsetDateTime::now_utc() + CookieDuration::hours(1),
        };
        self.sessions
            .create(&mut record)
            .await
            .expect("store session");
        format!("{SESSION_COOKIE_NAME}={}", record.id)
    }

    /// Store an open cart.
    ///
    /// # Panics
    ///
    /// Panics if the store write fails.
    pub async fn put_cart(&self, id: &str, owner: Option<&str>, items: Vec<LineItem>) -> CartId {
        let mut cart = Cart::new(CartId::new(id), owner.map(UserId::new), CurrencyCode::USD);
        cart.items = items;
        self.stores.carts.put(&cart).await.expect("put cart");
        cart.id
    }

    /// Set a product's stock level.
    ///
    /// # Panics
    ///
    /// Panics if the store write fails.
    pub async fn set_stock(&self, product: &str, stock: i64) {
        self.stores
            .inventory
            .set_stock(&ProductId::new(product), stock)
            .await
            .expect("set stock");
    }

    /// Current stock level.
    ///
    /// # Panics
    ///
    /// Panics if the store read fails or the product is unknown.
    pub async fn stock(&self, product: &str) -> i64 {
        self.stores
            .inventory
            .read_stock(&ProductId::new(product))
            .await
            .expect("read stock")
            .expect("product exists")
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// A short tag unique to this process, for IDs in shared databases.
#[must_use]
pub fn run_tag() -> String {
    format!(
        "{:x}{:x}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    )
}

/// Build a signature header for a payload at a given time.
///
/// # Panics
///
/// Panics if the secret is rejected by the signer.
#[must_use]
pub fn sign(payload: &[u8], timestamp: i64) -> String {
    sign_payload(&SecretString::from(WEBHOOK_SECRET), timestamp, payload).expect("sign payload")
}

/// A line item with a declared weight.
#[must_use]
pub fn line(product: &str, quantity: u32, unit_price: &str, weight_kg: Option<&str>) -> LineItem {
    LineItem {
        product_id: ProductId::new(product),
        quantity,
        unit_price: unit_price.parse().expect("decimal price"),
        weight_kg: weight_kg.map(|w| w.parse().expect("decimal weight")),
        name: None,
        sku: None,
    }
}

/// A gateway event envelope around a payment intent object.
#[must_use]
pub fn event(event_id: &str, kind: &str, intent: Value) -> Value {
    json!({
        "id": event_id,
        "type": kind,
        "created": chrono::Utc::now().timestamp(),
        "data": { "object": intent },
    })
}

/// A payment intent object carrying the checkout metadata.
#[must_use]
pub fn intent(reference: &str, amount_minor: i64, cart_id: &str, user_id: &str) -> Value {
    json!({
        "id": reference,
        "object": "payment_intent",
        "amount": amount_minor,
        "amount_received": amount_minor,
        "currency": "usd",
        "created": chrono::Utc::now().timestamp(),
        "metadata": { "cartId": cart_id, "userId": user_id },
    })
}
