//! Error taxonomy for the settlement engine.
//!
//! `ValidationError` is recoverable locally: the checkout UI drops the promo
//! or the points request and resubmits. `SettlementError` covers the
//! transactional failures around a settlement; `Consistency` variants are
//! fatal and must never be swallowed.

use crate::interfaces::StorageError;

/// User-facing validation failures, each with a specific reason.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Promo code '{0}' not found")]
    PromoNotFound(String),

    #[error("Promo is not active")]
    PromoInactive,

    #[error("Promo is outside its active window")]
    PromoExpired,

    #[error("Promo usage limit reached")]
    UsageLimitReached,

    #[error("Minimum purchase not met: required {required}, subtotal {subtotal}")]
    MinPurchaseNotMet {
        required: rust_decimal::Decimal,
        subtotal: rust_decimal::Decimal,
    },

    #[error("No items in the order match the promo scope")]
    NoEligibleItems,

    #[error("Insufficient loyalty points: available {available}, requested {requested}")]
    InsufficientPoints {
        available: rust_decimal::Decimal,
        requested: u64,
    },

    #[error("Loyalty program is disabled")]
    ProgramDisabled,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid promo: {0}")]
    InvalidPromo(String),

    #[error("Order has already been refunded")]
    AlreadyRefunded,

    #[error("No settlement record for order")]
    RecordNotFound,
}

/// Failures of the settlement transaction itself.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Promo compare-and-increment lost repeatedly; caller should resubmit.
    #[error("Promo contended after {attempts} attempts")]
    PromoContended { attempts: usize },

    /// The settlement transaction exceeded its deadline.
    #[error("Settlement timed out")]
    Timeout,

    /// Invariant violation (e.g. negative final amount). Fatal, never clamped
    /// silently in production.
    #[error("Consistency fault: {0}")]
    Consistency(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
