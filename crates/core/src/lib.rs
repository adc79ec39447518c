//! Lux Core - Shared checkout types.
//!
//! This crate provides the types shared by the checkout components:
//! - `storefront` - Pricing, payment authorization and webhook fulfillment service
//! - `cli` - Operator tools for migrations, webhook backlog and replay
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, decimal money helpers, addresses, and lifecycle statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
