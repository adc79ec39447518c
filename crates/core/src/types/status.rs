//! Status enums for checkout entities.
//!
//! Every status is persisted as lower-case text; `as_str`/`FromStr` are the single
//! source of truth for that representation.

use serde::{Deserialize, Serialize};

/// Error returned when a stored status string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stored text form.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError::new($kind, other)),
                }
            }
        }
    };
}

/// Cart lifecycle. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[default]
    Open,
    Completed,
}

text_enum!(CartStatus, "cart", {
    Open => "open",
    Completed => "completed",
});

/// Payment status as exposed to clients and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

text_enum!(PaymentStatus, "payment", {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Canceled => "canceled",
});

/// Fulfillment stage of a payment record.
///
/// ```text
/// Pending -> Succeeded -> OrderCreated -> StockApplied -> CartClosed
/// Pending -> Failed
/// Pending -> Canceled
/// ```
///
/// Each step is written with a conditional update, so a replayed settlement event
/// resumes from whichever stage the previous attempt reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentState {
    #[default]
    Pending,
    Succeeded,
    OrderCreated,
    StockApplied,
    CartClosed,
    Failed,
    Canceled,
}

text_enum!(FulfillmentState, "fulfillment", {
    Pending => "pending",
    Succeeded => "succeeded",
    OrderCreated => "order_created",
    StockApplied => "stock_applied",
    CartClosed => "cart_closed",
    Failed => "failed",
    Canceled => "canceled",
});

impl FulfillmentState {
    /// Client-facing payment status for this stage.
    #[must_use]
    pub const fn payment_status(self) -> PaymentStatus {
        match self {
            Self::Pending => PaymentStatus::Pending,
            Self::Succeeded | Self::OrderCreated | Self::StockApplied | Self::CartClosed => {
                PaymentStatus::Succeeded
            }
            Self::Failed => PaymentStatus::Failed,
            Self::Canceled => PaymentStatus::Canceled,
        }
    }

    /// Position along the settlement path, `None` for the failure branches.
    #[must_use]
    pub const fn settlement_rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Succeeded => Some(1),
            Self::OrderCreated => Some(2),
            Self::StockApplied => Some(3),
            Self::CartClosed => Some(4),
            Self::Failed | Self::Canceled => None,
        }
    }

    /// Whether the settlement path has reached at least `stage`.
    #[must_use]
    pub fn has_reached(self, stage: Self) -> bool {
        match (self.settlement_rank(), stage.settlement_rank()) {
            (Some(current), Some(target)) => current >= target,
            _ => self == stage,
        }
    }

    /// Failed and canceled records never move again.
    #[must_use]
    pub const fn is_abandoned(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }
}

/// Order lifecycle. Orders are created `Pending`; later stages belong to operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

text_enum!(OrderStatus, "order", {
    Pending => "pending",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

/// Reason recorded on a stock ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    #[default]
    OrderPlaced,
}

text_enum!(StockReason, "stock reason", {
    OrderPlaced => "order_placed",
});
