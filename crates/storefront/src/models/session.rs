//! Session-related types.
//!
//! Types stored in the session for authentication state. Sign-in itself lives in
//! the account service; checkout only reads what it leaves behind.

use serde::{Deserialize, Serialize};

use lux_core::UserId;

/// Session-stored user identity.
///
/// Minimal data stored in the session to identify the logged-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's ID.
    pub id: UserId,
    /// User's email address, used as the receipt address when the cart has none.
    #[serde(default)]
    pub email: Option<String>,
}

/// Session keys for authentication data.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";
}
