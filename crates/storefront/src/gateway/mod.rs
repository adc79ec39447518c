//! Payment gateway integration.
//!
//! Two seams:
//! - [`PaymentGateway`] creates payment authorizations (outbound).
//! - [`EventVerifier`] authenticates inbound webhook deliveries.
//!
//! The production implementations talk to Stripe; tests substitute fakes.

pub mod signature;
pub mod stripe;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use lux_core::{Address, CurrencyCode, PaymentReference};

pub use signature::{EventVerifier, StripeSignatureVerifier, VerifyError, sign_payload};
pub use stripe::StripeClient;

/// Errors from the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request did not complete within the configured timeout.
    #[error("payment gateway timed out")]
    Timeout,

    /// Network or transport failure.
    #[error("payment gateway request failed: {0}")]
    Request(String),

    /// The gateway rejected the request.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The gateway answered with something we could not read.
    #[error("unexpected payment gateway response: {0}")]
    Response(String),
}

/// A request to create a payment authorization.
#[derive(Debug, Clone)]
pub struct CreatePaymentIntent {
    /// Amount in minor units (cents).
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub receipt_email: Option<String>,
    pub shipping: Option<Address>,
}

/// A payment authorization created by the gateway.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub reference: PaymentReference,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Outbound payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment authorization.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the gateway cannot be reached, times out, or
    /// rejects the request.
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
    ) -> Result<PaymentIntent, GatewayError>;
}
