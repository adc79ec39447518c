//! Domain models for checkout.
//!
//! These types are separate from database row types; the `db` module converts
//! between the two.

pub mod cart;
pub mod failure;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod session;
pub mod webhook;

pub use cart::{Cart, CartTotals, LineItem, ShippingMethod};
pub use failure::PaymentFailure;
pub use inventory::{DecrementOutcome, StockDecrement, StockLedgerEntry};
pub use order::{Order, OrderInsert, OrderNumber};
pub use payment::{PaymentAbandonment, PaymentMetadata, PaymentRecord, Transition};
pub use session::CurrentUser;
pub use webhook::{EventKind, GatewayEvent, NewWebhookLog, PaymentIntentObject, WebhookLog};
