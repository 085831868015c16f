//! Domain error model.

use thiserror::Error;

/// Result type used across the stock ledger and costing layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Conservative pricing (no purchase history, stock shortage) and negative
/// balances are successful outcomes, so they have no variant here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced item has no catalog record.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// Zero or negative quantity on a purchase, sale, conversion or waste input.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A purchase, sale, conversion or waste record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate lot identifier, double reversal, or a referenced item removal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A per-item lock could not be acquired in time. Callers may retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
}

impl DomainError {
    pub fn item_not_found(item: impl core::fmt::Display) -> Self {
        Self::ItemNotFound(item.to_string())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn concurrent_modification(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

/// Reject zero or negative quantities before anything is written.
pub fn ensure_positive_quantity(quantity: i64, what: &str) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "{what} must be greater than 0 (got {quantity})"
        )));
    }
    Ok(())
}
