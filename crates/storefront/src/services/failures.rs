//! Durable, queryable payment failure records.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use lux_core::{PaymentFailureId, PaymentReference, UserId, WebhookLogId};

use crate::db::{FailureStore, RepositoryError};
use crate::models::PaymentFailure;

/// Details of a payment that did not settle.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub payment_reference: PaymentReference,
    pub user_id: Option<UserId>,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub code: Option<String>,
    pub webhook_log_id: Option<WebhookLogId>,
}

/// Writes and reads payment failure records.
#[derive(Clone)]
pub struct FailureRecorder {
    store: Arc<dyn FailureStore>,
}

impl FailureRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn FailureStore>) -> Self {
        Self { store }
    }

    /// Append a failure record.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store write fails.
    #[instrument(skip(self, report), fields(payment_reference = %report.payment_reference))]
    pub async fn record(&self, report: FailureReport) -> Result<PaymentFailure, RepositoryError> {
        let failure = PaymentFailure {
            id: PaymentFailureId::generate(),
            payment_reference: report.payment_reference,
            user_id: report.user_id,
            amount: report.amount,
            currency: report.currency,
            failure_reason: report.reason,
            failure_code: report.code,
            webhook_log_id: report.webhook_log_id,
            created_at: Utc::now(),
        };

        self.store.record(&failure).await?;

        info!(
            reason = %failure.failure_reason,
            code = failure.failure_code.as_deref().unwrap_or("-"),
            "Payment failure recorded"
        );

        Ok(failure)
    }

    /// Most recent failures first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store read fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<PaymentFailure>, RepositoryError> {
        self.store.recent(limit).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError` if the store read fails.
    pub async fn for_user(&self, user_id: &UserId) -> Result<Vec<PaymentFailure>, RepositoryError> {
        self.store.for_user(user_id).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError` if the store read fails.
    pub async fn for_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Vec<PaymentFailure>, RepositoryError> {
        self.store.for_payment(reference).await
    }
}
