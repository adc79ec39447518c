//! Core types for Lux checkout.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod address;
pub mod id;
pub mod money;
pub mod status;

pub use address::Address;
pub use id::*;
pub use money::{CurrencyCode, MoneyError, from_minor_units, round2, to_minor_units};
pub use status::*;
