//! Payment authorization for priced carts.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument};

use lux_core::{CartId, CurrencyCode, FulfillmentState, PaymentReference, UserId, to_minor_units};

use crate::db::{CartStore, PaymentStore};
use crate::error::{AppError, add_breadcrumb};
use crate::gateway::{CreatePaymentIntent, PaymentGateway};
use crate::models::{Cart, PaymentMetadata, PaymentRecord};

/// What the client needs to confirm a payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedPayment {
    pub client_secret: String,
    pub payment_reference: PaymentReference,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: CurrencyCode,
}

/// Service that binds priced carts to gateway payment authorizations.
pub struct PaymentAuthorizer {
    carts: Arc<dyn CartStore>,
    payments: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentAuthorizer {
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartStore>,
        payments: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            carts,
            payments,
            gateway,
        }
    }

    /// Create a gateway payment for a cart and record it as pending.
    ///
    /// All validation happens before the gateway is called.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` without a caller
    /// - `InvalidArgument` for a blank cart id, an empty cart or a non-positive total
    /// - `NotFound` for an unknown cart
    /// - `PermissionDenied` if the cart belongs to another user
    /// - `Gateway` if the gateway call fails, `Database` if a store fails
    #[instrument(skip(self, caller, order_id_hint), fields(cart_id = %cart_id))]
    pub async fn create_payment_intent(
        &self,
        caller: Option<&UserId>,
        cart_id: &CartId,
        order_id_hint: Option<&str>,
    ) -> Result<AuthorizedPayment, AppError> {
        let user_id = caller.ok_or_else(|| {
            AppError::Unauthenticated("You must be signed in to check out".to_string())
        })?;

        if cart_id.is_blank() {
            return Err(AppError::InvalidArgument("cartId is required".to_string()));
        }

        let cart = self
            .carts
            .get(cart_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Cart not found".to_string()))?;

        validate_cart(&cart, user_id)?;

        let amount = cart.totals.total;
        let currency = cart.totals.currency;
        let amount_minor =
            to_minor_units(amount).map_err(|e| AppError::InvalidArgument(e.to_string()))?;

        let metadata = PaymentMetadata {
            cart_id: cart.id.clone(),
            user_id: user_id.clone(),
            item_count: u64::try_from(cart.items.len()).unwrap_or(u64::MAX),
            subtotal: cart.totals.subtotal,
            shipping: cart.totals.shipping,
            tax: cart.totals.tax,
            order_id: order_id_hint
                .map(str::trim)
                .filter(|hint| !hint.is_empty())
                .map(str::to_owned),
        };

        let request = CreatePaymentIntent {
            amount_minor,
            currency,
            description: format!("TheLuxMining Order - {} item(s)", cart.items.len()),
            metadata: metadata.to_gateway_map(),
            receipt_email: cart.address.as_ref().and_then(|a| a.email.clone()),
            shipping: cart.address.clone(),
        };

        let intent = self
            .gateway
            .create_payment_intent(&request)
            .await
            .inspect_err(|e| error!(error = %e, "Payment gateway rejected payment intent"))?;

        let now = Utc::now();
        let record = PaymentRecord {
            reference: intent.reference.clone(),
            cart_id: cart.id.clone(),
            user_id: user_id.clone(),
            amount,
            currency,
            client_secret: intent.client_secret.clone(),
            metadata,
            state: FulfillmentState::Pending,
            settled_amount: None,
            order_id: None,
            order_number: None,
            failure_reason: None,
            failure_code: None,
            canceled_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.payments.insert(&record).await?;
        self.carts.bind_payment(&cart.id, &intent.reference).await?;

        info!(
            payment_reference = %intent.reference,
            amount_minor,
            currency = %currency,
            "Payment intent created"
        );
        add_breadcrumb(
            "checkout",
            "Payment intent created",
            Some(&[("payment_reference", intent.reference.as_str())]),
        );

        Ok(AuthorizedPayment {
            client_secret: intent.client_secret,
            payment_reference: intent.reference,
            amount,
            currency,
        })
    }
}

fn validate_cart(cart: &Cart, user_id: &UserId) -> Result<(), AppError> {
    if cart.user_id.as_ref().is_some_and(|owner| owner != user_id) {
        return Err(AppError::PermissionDenied(
            "You don't have permission to access this cart".to_string(),
        ));
    }

    if cart.is_empty() {
        return Err(AppError::InvalidArgument("Cart is empty".to_string()));
    }

    if cart.totals.total <= Decimal::ZERO {
        return Err(AppError::InvalidArgument(
            "Cart total must be greater than zero. Please ensure shipping has been calculated."
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use lux_core::{Address, ProductId};

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::gateway::{GatewayError, PaymentIntent};
    use crate::models::LineItem;

    #[derive(Default)]
    struct RecordingGateway {
        requests: Mutex<Vec<CreatePaymentIntent>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn create_payment_intent(
            &self,
            request: &CreatePaymentIntent,
        ) -> Result<PaymentIntent, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(message) = &self.fail_with {
                return Err(GatewayError::Api {
                    status: 402,
                    message: message.clone(),
                });
            }
            Ok(PaymentIntent {
                reference: PaymentReference::new("pi_test_1"),
                client_secret: "pi_test_1_secret_abc".to_string(),
                amount_minor: request.amount_minor,
                currency: request.currency.gateway_code(),
            })
        }
    }

    fn priced_cart(owner: Option<&str>) -> Cart {
        let mut cart = Cart::new(
            CartId::new("cart-1"),
            owner.map(UserId::new),
            CurrencyCode::USD,
        );
        cart.items.push(LineItem {
            product_id: ProductId::new("miner-s19"),
            quantity: 2,
            unit_price: Decimal::from(100),
            weight_kg: None,
            name: None,
            sku: None,
        });
        cart.totals.subtotal = Decimal::from(200);
        cart.totals.shipping = Decimal::from(35);
        cart.totals.tax = Decimal::new(1704, 2);
        cart.totals.total = Decimal::new(25204, 2);
        cart.address = Some(Address {
            country: "US".to_string(),
            region: Some("CA".to_string()),
            email: Some("buyer@example.com".to_string()),
            ..Address::default()
        });
        cart
    }

    async fn setup(
        cart: Cart,
        gateway: RecordingGateway,
    ) -> (PaymentAuthorizer, Arc<MemoryStore>, Arc<RecordingGateway>) {
        let store = Arc::new(MemoryStore::default());
        store.put(&cart).await.unwrap();
        let gateway = Arc::new(gateway);
        let authorizer = PaymentAuthorizer::new(store.clone(), store.clone(), gateway.clone());
        (authorizer, store, gateway)
    }

    #[tokio::test]
    async fn test_creates_pending_record_and_binds_cart() {
        let (authorizer, store, gateway) =
            setup(priced_cart(Some("user-1")), RecordingGateway::default()).await;

        let payment = authorizer
            .create_payment_intent(Some(&UserId::new("user-1")), &CartId::new("cart-1"), Some("draft-7"))
            .await
            .unwrap();
        assert_eq!(payment.payment_reference.as_str(), "pi_test_1");
        assert_eq!(payment.amount, Decimal::new(25204, 2));

        let request = gateway.requests.lock().unwrap().pop().unwrap();
        assert_eq!(request.amount_minor, 25204);
        assert_eq!(request.description, "TheLuxMining Order - 1 item(s)");
        assert_eq!(request.metadata.get("orderId").map(String::as_str), Some("draft-7"));
        assert_eq!(request.metadata.get("itemCount").map(String::as_str), Some("1"));
        assert_eq!(request.receipt_email.as_deref(), Some("buyer@example.com"));

        let record = PaymentStore::get(&*store, &PaymentReference::new("pi_test_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, FulfillmentState::Pending);
        assert_eq!(record.user_id.as_str(), "user-1");

        let cart = CartStore::get(&*store, &CartId::new("cart-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cart.payment_reference.unwrap().as_str(), "pi_test_1");
    }

    #[tokio::test]
    async fn test_anonymous_cart_can_be_claimed() {
        let (authorizer, _, _) = setup(priced_cart(None), RecordingGateway::default()).await;
        let result = authorizer
            .create_payment_intent(Some(&UserId::new("user-2")), &CartId::new("cart-1"), None)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_validation_happens_before_gateway_call() {
        let mut unpriced = priced_cart(Some("user-1"));
        unpriced.totals.total = Decimal::ZERO;
        let (authorizer, _, gateway) = setup(unpriced, RecordingGateway::default()).await;
        let user = UserId::new("user-1");
        let cart_id = CartId::new("cart-1");

        let anonymous = authorizer.create_payment_intent(None, &cart_id, None).await;
        assert!(matches!(anonymous, Err(AppError::Unauthenticated(_))));

        let other = authorizer
            .create_payment_intent(Some(&UserId::new("user-9")), &cart_id, None)
            .await;
        assert!(matches!(other, Err(AppError::PermissionDenied(_))));

        let missing = authorizer
            .create_payment_intent(Some(&user), &CartId::new("nope"), None)
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let zero = authorizer.create_payment_intent(Some(&user), &cart_id, None).await;
        assert!(matches!(zero, Err(AppError::InvalidArgument(_))));

        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failure_records_nothing() {
        let gateway = RecordingGateway {
            fail_with: Some("Your card was declined.".to_string()),
            ..RecordingGateway::default()
        };
        let (authorizer, store, _) = setup(priced_cart(Some("user-1")), gateway).await;

        let result = authorizer
            .create_payment_intent(Some(&UserId::new("user-1")), &CartId::new("cart-1"), None)
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), "internal");
        assert_eq!(err.to_string(), "Your card was declined.");

        let record = PaymentStore::get(&*store, &PaymentReference::new("pi_test_1"))
            .await
            .unwrap();
        assert!(record.is_none());
    }
}
