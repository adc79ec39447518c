//! Lux checkout server.
//!
//! Serves the checkout API and the payment webhook on port 3000.
//!
//! # Architecture
//!
//! - Axum web framework, JSON endpoints
//! - `PostgreSQL` for carts, payments, orders, stock ledger and webhook log
//! - Stripe for payment authorization and signed settlement events
//! - Sessions shared with the account service (`tower-sessions`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use lux_storefront::config::StorefrontConfig;
use lux_storefront::db::{self, Stores};
use lux_storefront::gateway::{StripeClient, StripeSignatureVerifier};
use lux_storefront::middleware::create_session_layer;
use lux_storefront::rates::RateTables;
use lux_storefront::state::{AppState, Dependencies};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lux_storefront=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            config
                .json_logs
                .then(|| tracing_subscriber::fmt::layer().json()),
        )
        .with((!config.json_logs).then(tracing_subscriber::fmt::layer))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p lux-cli -- migrate
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    let rate_tables = RateTables::load(config.checkout.rate_tables_path.as_deref())
        .expect("Failed to load rate tables");
    let gateway = StripeClient::new(&config.payments).expect("Failed to build payment client");
    let verifier = StripeSignatureVerifier::new(config.payments.webhook_tolerance);

    if config.payments.webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set; webhook deliveries will be rejected");
    }
    if !config.flags.payments {
        tracing::warn!("Payments flag is off; checkout and webhooks are disabled");
    }

    let session_layer = create_session_layer(&pool, &config);
    let state = AppState::new(
        config.clone(),
        Dependencies {
            stores: Stores::postgres(&pool),
            pool: Some(pool),
            gateway: Arc::new(gateway),
            verifier: Arc::new(verifier),
            rate_tables,
        },
    );

    let app = lux_storefront::app(state, session_layer);

    // Start server
    let addr = config.socket_addr();
    tracing::info!("checkout listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
