//! Webhook event types and the append-only delivery log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use lux_core::WebhookLogId;

/// Event kinds the fulfillment pipeline acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCanceled,
    /// Acknowledged and logged, no action.
    Other(String),
}

impl EventKind {
    #[must_use]
    pub fn parse(kind: &str) -> Self {
        match kind {
            "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "payment_intent.canceled" => Self::PaymentCanceled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A verified gateway event.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Gateway creation time, unix seconds.
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl GatewayEvent {
    #[must_use]
    pub fn event_kind(&self) -> EventKind {
        EventKind::parse(&self.kind)
    }

    /// Gateway creation time; out-of-range values fall back to the epoch.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created, 0).unwrap_or_default()
    }

    /// Interpret the event object as a payment intent.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the object is not a payment intent.
    pub fn payment_intent(&self) -> Result<PaymentIntentObject, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

/// The parts of a gateway payment intent the orchestrator reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    /// Amount in minor units.
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl PaymentIntentObject {
    /// Metadata value, ignoring blanks.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Settled amount in minor units.
    #[must_use]
    pub fn settled_minor(&self) -> i64 {
        self.amount_received.filter(|a| *a > 0).unwrap_or(self.amount)
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created, 0).filter(|_| self.created > 0)
    }

    #[must_use]
    pub fn failure_reason(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    #[must_use]
    pub fn failure_code(&self) -> Option<String> {
        self.last_payment_error.as_ref().and_then(|e| e.code.clone())
    }

    #[must_use]
    pub fn canceled_reason(&self) -> String {
        self.cancellation_reason
            .clone()
            .unwrap_or_else(|| "User canceled".to_string())
    }
}

/// A new log row, written before any side effect runs.
#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub event_id: String,
    pub kind: String,
    pub gateway_created: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl NewWebhookLog {
    #[must_use]
    pub fn from_event(event: &GatewayEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            kind: event.kind.clone(),
            gateway_created: event.created_at(),
            payload: event.data.object.clone(),
        }
    }
}

/// One received webhook delivery. Rows are never deleted.
#[derive(Debug, Clone)]
pub struct WebhookLog {
    pub id: WebhookLogId,
    pub event_id: String,
    pub kind: String,
    pub gateway_created: DateTime<Utc>,
    /// The event's data object.
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl WebhookLog {
    /// Rebuild the gateway event this row was logged from.
    #[must_use]
    pub fn to_event(&self) -> GatewayEvent {
        GatewayEvent {
            id: self.event_id.clone(),
            kind: self.kind.clone(),
            created: self.gateway_created.timestamp(),
            data: EventData {
                object: self.payload.clone(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parses_and_classifies() {
        let raw = r#"{
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "created": 1767225600,
            "data": {"object": {
                "id": "pi_1",
                "amount": 25204,
                "currency": "usd",
                "metadata": {"cartId": "cart-1", "userId": ""},
                "last_payment_error": {"message": "Card declined", "code": "card_declined"}
            }}
        }"#;
        let event: GatewayEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_kind(), EventKind::PaymentFailed);

        let intent = event.payment_intent().unwrap();
        assert_eq!(intent.metadata_value("cartId"), Some("cart-1"));
        assert_eq!(intent.metadata_value("userId"), None);
        assert_eq!(intent.failure_reason(), "Card declined");
        assert_eq!(intent.failure_code().as_deref(), Some("card_declined"));
    }

    #[test]
    fn test_defaults_for_missing_reasons() {
        let intent: PaymentIntentObject = serde_json::from_str(r#"{"id": "pi_2"}"#).unwrap();
        assert_eq!(intent.failure_reason(), "Unknown error");
        assert_eq!(intent.canceled_reason(), "User canceled");
        assert!(intent.created_at().is_none());
    }

    #[test]
    fn test_unknown_kinds_are_other() {
        assert_eq!(
            EventKind::parse("charge.refunded"),
            EventKind::Other("charge.refunded".to_string())
        );
    }
}
