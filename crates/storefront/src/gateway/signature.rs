//! Webhook signature verification.
//!
//! Deliveries carry a `Stripe-Signature` header of the form
//! `t=<unix seconds>,v1=<hex hmac>[,v1=...]`. The signed payload is
//! `"{t}.{raw body}"`, HMAC-SHA256 keyed with the endpoint's webhook secret.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::models::GatewayEvent;

/// Why a delivery was rejected.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The signature header is not in the expected format.
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    /// The signature timestamp is outside the accepted window.
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,

    /// No signature in the header matches the payload.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// The payload is authentic but is not a readable event.
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

/// Authenticates a raw webhook delivery and parses it into an event.
pub trait EventVerifier: Send + Sync {
    /// Verify `signature` over `payload` with `secret`, then parse the event.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if the signature is missing parts, stale, or does
    /// not match, or if the payload is not a valid event.
    fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<GatewayEvent, VerifyError>;
}

/// Verifier for Stripe-style signed deliveries.
#[derive(Debug, Clone)]
pub struct StripeSignatureVerifier {
    tolerance: Duration,
    /// Fixed clock for tests; `None` reads the system clock.
    now: Option<i64>,
}

impl StripeSignatureVerifier {
    #[must_use]
    pub const fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            now: None,
        }
    }

    /// Evaluate timestamps against a fixed `now` (unix seconds).
    #[must_use]
    pub const fn at(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> Result<i64, VerifyError> {
        if let Some(now) = self.now {
            return Ok(now);
        }
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| VerifyError::MalformedHeader(e.to_string()))?
            .as_secs();
        i64::try_from(secs).map_err(|_| VerifyError::MalformedHeader("system time overflow".into()))
    }
}

impl EventVerifier for StripeSignatureVerifier {
    fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<GatewayEvent, VerifyError> {
        let header = SignatureHeader::parse(signature)?;

        if self.now()?.abs_diff(header.timestamp) > self.tolerance.as_secs() {
            return Err(VerifyError::StaleTimestamp);
        }

        let expected = compute_signature(secret, header.timestamp, payload)?;
        if !header
            .signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            return Err(VerifyError::SignatureMismatch);
        }

        debug!("Webhook signature verified");

        serde_json::from_slice(payload).map_err(|e| VerifyError::MalformedPayload(e.to_string()))
    }
}

struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

impl<'a> SignatureHeader<'a> {
    fn parse(header: &'a str) -> Result<Self, VerifyError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        VerifyError::MalformedHeader("invalid timestamp".to_string())
                    })?);
                }
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| VerifyError::MalformedHeader("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(VerifyError::MalformedHeader("missing v1 signature".into()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn compute_signature(
    secret: &SecretString,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, VerifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| VerifyError::MalformedHeader(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Produce a signature header for `payload`, as the gateway would.
///
/// Used by operator tooling and tests to craft signed deliveries.
///
/// # Errors
///
/// Returns `VerifyError` if the secret cannot key an HMAC.
pub fn sign_payload(
    secret: &SecretString,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, VerifyError> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_767_225_600;
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded","created":1767225600,"data":{"object":{"id":"pi_1"}}}"#;

    fn secret() -> SecretString {
        SecretString::from("whsec_test_3f9a8b7c6d5e4f3a2b1c")
    }

    fn verifier() -> StripeSignatureVerifier {
        StripeSignatureVerifier::new(Duration::from_secs(300)).at(NOW)
    }

    #[test]
    fn test_valid_signature_parses_event() {
        let header = sign_payload(&secret(), NOW, BODY).unwrap();
        let event = verifier().verify(BODY, &header, &secret()).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind, "payment_intent.succeeded");
    }

    #[test]
    fn test_any_matching_v1_is_accepted() {
        let signed = sign_payload(&secret(), NOW, BODY).unwrap();
        let good = signed.split_once("v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v1={good}");
        assert!(verifier().verify(BODY, &header, &secret()).is_ok());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let header = sign_payload(&SecretString::from("whsec_other"), NOW, BODY).unwrap();
        let result = verifier().verify(BODY, &header, &secret());
        assert!(matches!(result, Err(VerifyError::SignatureMismatch)));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let header = sign_payload(&secret(), NOW, BODY).unwrap();
        let tampered = String::from_utf8_lossy(BODY).replace("pi_1", "pi_2");
        let result = verifier().verify(tampered.as_bytes(), &header, &secret());
        assert!(matches!(result, Err(VerifyError::SignatureMismatch)));
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let header = sign_payload(&secret(), NOW - 301, BODY).unwrap();
        let result = verifier().verify(BODY, &header, &secret());
        assert!(matches!(result, Err(VerifyError::StaleTimestamp)));
    }

    #[test]
    fn test_extreme_timestamp_is_stale_not_overflow() {
        for header in [
            "t=-9223372036854775000,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            let result = verifier().verify(BODY, header, &secret());
            assert!(
                matches!(result, Err(VerifyError::StaleTimestamp)),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        for header in ["", "v1=abc", "t=abc,v1=abc", "t=1767225600"] {
            let result = verifier().verify(BODY, header, &secret());
            assert!(
                matches!(result, Err(VerifyError::MalformedHeader(_))),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn test_authentic_but_malformed_payload() {
        let body = b"not json";
        let header = sign_payload(&secret(), NOW, body).unwrap();
        let result = verifier().verify(body, &header, &secret());
        assert!(matches!(result, Err(VerifyError::MalformedPayload(_))));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
