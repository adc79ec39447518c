//! Feature flag guards for the payments surface.
//!
//! Two shapes of the same check:
//! - [`payments_webhook_guard`] is middleware for the webhook route. With the
//!   flag off it answers `200 payments disabled` so the gateway stops retrying.
//! - [`PaymentsEnabled`] is an extractor for the checkout RPC handlers. With
//!   the flag off it rejects with `failed-precondition`.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

/// Body returned to the gateway while payments are switched off.
pub const PAYMENTS_DISABLED: &str = "payments disabled";

/// Short-circuit webhook deliveries while payments are disabled.
pub async fn payments_webhook_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config().flags.payments {
        info!("Webhook delivery ignored, payments disabled");
        return (StatusCode::OK, PAYMENTS_DISABLED).into_response();
    }

    next.run(request).await
}

/// Extractor that rejects checkout calls while payments are disabled.
#[derive(Debug)]
pub struct PaymentsEnabled;

impl FromRequestParts<AppState> for PaymentsEnabled {
    type Rejection = AppError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config().flags.payments {
            Ok(Self)
        } else {
            Err(AppError::FailedPrecondition(
                "Payments are currently disabled".to_string(),
            ))
        }
    }
}
