//! Payment gateway webhook endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::instrument;

use crate::services::WebhookError;
use crate::state::AppState;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receive a gateway event.
///
/// Acknowledges with `{"received": true}` once the delivery is logged, even if
/// handling it failed; the failure is kept on the log row for replay.
#[instrument(skip_all)]
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    state.webhooks().handle_event(&body, signature).await?;

    Ok(Json(json!({ "received": true })))
}
