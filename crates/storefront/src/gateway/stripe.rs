//! Stripe API client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use lux_core::{Address, PaymentReference};

use super::{CreatePaymentIntent, GatewayError, PaymentGateway, PaymentIntent};
use crate::config::PaymentsConfig;

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Request` if the HTTP client cannot be built.
    pub fn new(config: &PaymentsConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

/// Encode a create request as Stripe's bracketed form fields.
fn form_fields(request: &CreatePaymentIntent) -> Vec<(String, String)> {
    let mut fields = vec![
        ("amount".to_string(), request.amount_minor.to_string()),
        (
            "currency".to_string(),
            request.currency.gateway_code().to_string(),
        ),
        ("description".to_string(), request.description.clone()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];

    for (key, value) in &request.metadata {
        fields.push((format!("metadata[{key}]"), value.clone()));
    }

    if let Some(email) = &request.receipt_email {
        fields.push(("receipt_email".to_string(), email.clone()));
    }

    if let Some(address) = &request.shipping {
        fields.extend(shipping_fields(address));
    }

    fields
}

fn shipping_fields(address: &Address) -> Vec<(String, String)> {
    let name = address
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Customer");
    let mut fields = vec![
        ("shipping[name]".to_string(), name.to_string()),
        (
            "shipping[address][country]".to_string(),
            address.country_code(),
        ),
    ];

    let optional = [
        ("shipping[address][line1]", &address.line1),
        ("shipping[address][line2]", &address.line2),
        ("shipping[address][city]", &address.city),
        ("shipping[address][state]", &address.region),
        ("shipping[address][postal_code]", &address.postal_code),
        ("shipping[phone]", &address.phone),
    ];
    for (key, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            fields.push((key.to_string(), value.to_string()));
        }
    }

    fields
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, request), fields(amount = request.amount_minor, currency = %request.currency))]
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&form_fields(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Response(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| {
                    debug!(code = ?envelope.error.code, "Payment gateway rejected request");
                    envelope.error.message
                })
                .unwrap_or_else(|| format!("payment gateway returned {status}"));
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let intent: IntentResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Response(e.to_string()))?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| GatewayError::Response("missing client_secret".to_string()))?;

        debug!(reference = %intent.id, "Payment intent created");

        Ok(PaymentIntent {
            reference: PaymentReference::new(intent.id),
            client_secret,
            amount_minor: intent.amount,
            currency: intent.currency,
        })
    }
}
