//! Checkout RPC handlers.
//!
//! JSON in, JSON out. Errors use the `{"error": {"code", "message"}}` body
//! rendered by [`AppError`](crate::error::AppError).

use axum::{
    Json,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
};
use serde::Deserialize;
use tracing::instrument;

use lux_core::{Address, CartId};

use crate::error::{AppError, Result};
use crate::middleware::{PaymentsEnabled, RequireAuth};
use crate::services::{AuthorizedPayment, Repriced};
use crate::state::AppState;

/// JSON body whose rejection renders as an `invalid-argument` error.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Body of `POST /api/checkout/reprice`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepriceRequest {
    #[serde(default)]
    pub cart_id: String,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub shipping_method_id: Option<String>,
}

/// Body of `POST /api/checkout/payment-intent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    #[serde(default)]
    pub cart_id: String,
    /// Client-side order hint, echoed into the payment metadata.
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Price a cart for a destination.
#[instrument(skip(_enabled, state, request), fields(cart_id = %request.cart_id))]
pub async fn reprice(
    _enabled: PaymentsEnabled,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<RepriceRequest>,
) -> Result<Json<Repriced>> {
    let repriced = state
        .pricing()
        .reprice(
            &CartId::new(request.cart_id),
            request.address.as_ref(),
            request.shipping_method_id.as_deref(),
        )
        .await?;

    Ok(Json(repriced))
}

/// Create a payment authorization for the signed-in user's cart.
#[instrument(skip(_enabled, state, user, request), fields(cart_id = %request.cart_id, user_id = %user.id))]
pub async fn create_payment_intent(
    _enabled: PaymentsEnabled,
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    ValidJson(request): ValidJson<PaymentIntentRequest>,
) -> Result<Json<AuthorizedPayment>> {
    let payment = state
        .payments()
        .create_payment_intent(
            Some(&user.id),
            &CartId::new(request.cart_id),
            request.order_id.as_deref(),
        )
        .await?;

    Ok(Json(payment))
}
