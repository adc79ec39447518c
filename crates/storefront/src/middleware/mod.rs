//! HTTP middleware stack for checkout.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Session layer (tower-sessions with `PostgreSQL` store)
//! 5. Payments flag (webhook route only)

pub mod auth;
pub mod flags;
pub mod request_id;
pub mod session;

pub use auth::{OptionalAuth, RequireAuth};
pub use flags::{PAYMENTS_DISABLED, PaymentsEnabled, payments_webhook_guard};
pub use request_id::request_id_middleware;
pub use session::create_session_layer;
