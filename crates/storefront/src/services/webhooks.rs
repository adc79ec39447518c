//! Inbound payment webhooks.
//!
//! Every delivery that passes signature verification is appended to the
//! webhook log before anything else happens. The log row is the durability
//! point: once it is written the delivery is acknowledged, and a handler error
//! is recorded on the row rather than returned to the gateway.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use lux_core::WebhookLogId;

use crate::db::{RepositoryError, WebhookLogStore};
use crate::gateway::{EventVerifier, VerifyError};
use crate::models::{NewWebhookLog, WebhookLog};
use crate::services::fulfillment::{FulfillmentError, FulfillmentOrchestrator, FulfillmentOutcome};

/// Errors that reject a delivery. The gateway retries on 5xx.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing Stripe signature")]
    MissingSignature,

    #[error("Webhook secret not configured")]
    SecretNotConfigured,

    #[error("Webhook Error: {0}")]
    Verification(#[from] VerifyError),

    /// The log row could not be written, so nothing was processed.
    #[error("Webhook processing failed")]
    Log(#[source] RepositoryError),

    #[error("webhook log {0} not found")]
    UnknownLog(WebhookLogId),

    #[error(transparent)]
    Store(RepositoryError),
}

impl WebhookError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingSignature | Self::Verification(_) => StatusCode::BAD_REQUEST,
            Self::UnknownLog(_) => StatusCode::NOT_FOUND,
            Self::SecretNotConfigured | Self::Log(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            error!(error = %self, sentry_event_id = %event_id, "Webhook rejected");
        } else {
            warn!(error = %self, "Webhook rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// A logged delivery and what handling it did.
#[derive(Debug)]
pub struct Delivery {
    pub log_id: WebhookLogId,
    /// The handler's error text, also stored on the log row.
    pub outcome: Result<FulfillmentOutcome, String>,
}

/// Verifies, logs and dispatches webhook deliveries.
pub struct WebhookGateway {
    log: Arc<dyn WebhookLogStore>,
    verifier: Arc<dyn EventVerifier>,
    secret: Option<SecretString>,
    orchestrator: Arc<FulfillmentOrchestrator>,
}

impl WebhookGateway {
    #[must_use]
    pub fn new(
        log: Arc<dyn WebhookLogStore>,
        verifier: Arc<dyn EventVerifier>,
        secret: Option<SecretString>,
        orchestrator: Arc<FulfillmentOrchestrator>,
    ) -> Self {
        Self {
            log,
            verifier,
            secret,
            orchestrator,
        }
    }

    /// Verify a raw delivery, log it, then dispatch it.
    ///
    /// # Errors
    ///
    /// - `MissingSignature` or `Verification` if the delivery is not authentic
    ///   or not a readable event; nothing is logged
    /// - `SecretNotConfigured` if no webhook secret is set; nothing is logged
    /// - `Log` if the log row cannot be written
    ///
    /// Handler failures after the row is written are not errors here; they
    /// are recorded on the row and returned in [`Delivery::outcome`].
    #[instrument(skip_all)]
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Delivery, WebhookError> {
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        let secret = self
            .secret
            .as_ref()
            .ok_or(WebhookError::SecretNotConfigured)?;

        let event = self.verifier.verify(payload, signature, secret)?;

        let entry = self
            .log
            .append(&NewWebhookLog::from_event(&event))
            .await
            .map_err(WebhookError::Log)?;

        info!(
            event_id = %event.id,
            kind = %event.kind,
            log_id = %entry.id,
            "Webhook received"
        );

        Ok(self.dispatch(&entry).await)
    }

    /// Re-dispatch a logged delivery, marking the row with the new result.
    ///
    /// # Errors
    ///
    /// Returns `UnknownLog` for an unknown row, `Store` if the store read fails.
    #[instrument(skip(self), fields(log_id = %log_id))]
    pub async fn replay(&self, log_id: &WebhookLogId) -> Result<Delivery, WebhookError> {
        let entry = self
            .log
            .get(log_id)
            .await
            .map_err(WebhookError::Store)?
            .ok_or_else(|| WebhookError::UnknownLog(log_id.clone()))?;

        info!(event_id = %entry.event_id, kind = %entry.kind, "Replaying webhook");
        Ok(self.dispatch(&entry).await)
    }

    /// Unprocessed deliveries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the store read fails.
    pub async fn backlog(&self, limit: i64) -> Result<Vec<WebhookLog>, WebhookError> {
        self.log.backlog(limit).await.map_err(WebhookError::Store)
    }

    async fn dispatch(&self, entry: &WebhookLog) -> Delivery {
        let event = entry.to_event();
        let result = self.orchestrator.handle(&event, &entry.id).await;

        // Best effort: the delivery is acknowledged either way.
        let marked = match &result {
            Ok(_) => self.log.mark_processed(&entry.id).await,
            Err(e) => {
                error!(event_id = %entry.event_id, error = %e, "Webhook handler failed");
                self.log.mark_error(&entry.id, &e.to_string()).await
            }
        };
        if let Err(e) = marked {
            error!(log_id = %entry.id, error = %e, "Failed to update webhook log");
        }

        Delivery {
            log_id: entry.id.clone(),
            outcome: result.map_err(|e: FulfillmentError| e.to_string()),
        }
    }
}
