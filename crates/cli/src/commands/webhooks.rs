//! Webhook log inspection and replay.
//!
//! Replay re-runs the fulfillment handler for a stored delivery without
//! re-verifying it; the signature was checked when the row was written.
//!
//! # Environment Variables
//!
//! - `LUX_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//! - `LUX_ORDER_PREFIX` - Order number prefix (default `LUX`)

use std::sync::Arc;
use std::time::Duration;

use lux_core::WebhookLogId;
use lux_storefront::db::Stores;
use lux_storefront::gateway::StripeSignatureVerifier;
use lux_storefront::services::{FailureRecorder, FulfillmentOrchestrator, WebhookGateway};
use tracing::{info, warn};

use super::connect;

/// List deliveries that have not been processed.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the query fails.
pub async fn backlog(limit: i64) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect().await?;
    let gateway = webhook_gateway(Stores::postgres(&pool));

    let rows = gateway.backlog(limit).await?;
    info!(count = rows.len(), "Webhook backlog");
    for row in &rows {
        info!(
            id = %row.id,
            event = %row.event_id,
            kind = %row.kind,
            received = %row.received_at,
            error = row.error.as_deref().unwrap_or("-"),
            "pending"
        );
    }

    Ok(())
}

/// Re-run the handler for one logged delivery.
///
/// # Errors
///
/// Returns an error if the row does not exist or cannot be read. A handler
/// failure is reported and stored on the row, then returned as an error.
pub async fn replay(log_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect().await?;
    let gateway = webhook_gateway(Stores::postgres(&pool));

    let delivery = gateway.replay(&WebhookLogId::new(log_id)).await?;
    match delivery.outcome {
        Ok(outcome) => {
            info!(log_id = %delivery.log_id, ?outcome, "Replay complete");
            Ok(())
        }
        Err(error) => {
            warn!(log_id = %delivery.log_id, %error, "Replay failed");
            Err(error.into())
        }
    }
}

fn webhook_gateway(stores: Stores) -> WebhookGateway {
    let prefix = std::env::var("LUX_ORDER_PREFIX").unwrap_or_else(|_| "LUX".to_string());
    let failures = FailureRecorder::new(stores.failures.clone());
    let log = stores.webhook_log.clone();
    let orchestrator = Arc::new(FulfillmentOrchestrator::new(stores, failures, prefix));

    // Replay never verifies, so no secret is needed.
    WebhookGateway::new(
        log,
        Arc::new(StripeSignatureVerifier::new(Duration::from_secs(300))),
        None,
        orchestrator,
    )
}
