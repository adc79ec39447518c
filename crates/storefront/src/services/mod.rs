//! Business logic services for checkout.
//!
//! # Services
//!
//! - `pricing` - Shipping options, tax and totals for a cart and destination
//! - `payments` - Payment authorization for priced carts
//! - `webhooks` - Verification, logging and dispatch of gateway events
//! - `fulfillment` - Orders, stock and cart closure for settled payments
//! - `failures` - Payment failure records

pub mod failures;
pub mod fulfillment;
pub mod payments;
pub mod pricing;
pub mod webhooks;

pub use failures::{FailureRecorder, FailureReport};
pub use fulfillment::{FulfillmentError, FulfillmentOrchestrator, FulfillmentOutcome};
pub use payments::{AuthorizedPayment, PaymentAuthorizer};
pub use pricing::{PricingEngine, Repriced, ShippingQuote};
pub use webhooks::{Delivery, WebhookError, WebhookGateway};
