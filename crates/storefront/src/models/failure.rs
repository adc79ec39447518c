//! Payment failure records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use lux_core::{PaymentFailureId, PaymentReference, UserId, WebhookLogId};

/// A durable record of a payment that did not settle.
#[derive(Debug, Clone)]
pub struct PaymentFailure {
    pub id: PaymentFailureId,
    pub payment_reference: PaymentReference,
    pub user_id: Option<UserId>,
    /// Amount in standard units.
    pub amount: Decimal,
    /// Lower-case currency code as reported by the gateway.
    pub currency: String,
    pub failure_reason: String,
    pub failure_code: Option<String>,
    pub webhook_log_id: Option<WebhookLogId>,
    pub created_at: DateTime<Utc>,
}
