//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::Stores;
use crate::gateway::{EventVerifier, PaymentGateway};
use crate::rates::RateTables;
use crate::services::{
    FailureRecorder, FulfillmentOrchestrator, PaymentAuthorizer, PricingEngine, WebhookGateway,
};

/// Collaborators the checkout services are built from.
///
/// Production wires `PostgreSQL` stores and the Stripe client; tests wire the
/// in-memory stores and a fake gateway.
pub struct Dependencies {
    pub stores: Stores,
    /// Present when the stores are database-backed; used by readiness checks.
    pub pool: Option<PgPool>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub verifier: Arc<dyn EventVerifier>,
    pub rate_tables: RateTables,
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// configuration and the checkout services.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    pricing: PricingEngine,
    payments: PaymentAuthorizer,
    webhooks: WebhookGateway,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(config: StorefrontConfig, deps: Dependencies) -> Self {
        let Dependencies {
            stores,
            pool,
            gateway,
            verifier,
            rate_tables,
        } = deps;

        let failures = FailureRecorder::new(stores.failures.clone());
        let pricing = PricingEngine::new(stores.carts.clone(), Arc::new(rate_tables));
        let payments =
            PaymentAuthorizer::new(stores.carts.clone(), stores.payments.clone(), gateway);
        let orchestrator = Arc::new(FulfillmentOrchestrator::new(
            stores.clone(),
            failures,
            config.checkout.order_prefix.clone(),
        ));
        let webhooks = WebhookGateway::new(
            stores.webhook_log.clone(),
            verifier,
            config.payments.webhook_secret.clone(),
            orchestrator,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                pricing,
                payments,
                webhooks,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get the database pool, if the stores are database-backed.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn pricing(&self) -> &PricingEngine {
        &self.inner.pricing
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentAuthorizer {
        &self.inner.payments
    }

    #[must_use]
    pub fn webhooks(&self) -> &WebhookGateway {
        &self.inner.webhooks
    }
}
