//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// transitions, ownership, stock). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Requested transition targets the state the entity is already in.
    #[error("{machine} is already {state}")]
    EqualState { machine: &'static str, state: String },

    /// Requested transition is not in the machine's allow-list.
    #[error("illegal {machine} transition: {from} -> {to}")]
    IllegalTransition {
        machine: &'static str,
        from: String,
        to: String,
    },

    /// The conditional update matched no row: the entity moved under the caller.
    #[error("{entity} {id} changed concurrently")]
    StaleTransition { entity: &'static str, id: String },

    /// A requested resource was not found.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The caller does not own the resource.
    #[error("forbidden")]
    Forbidden,

    /// No item of the product is available for reservation.
    #[error("no stock for product {product}")]
    NoStock { product: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn stale(entity: &'static str, id: impl ToString) -> Self {
        Self::StaleTransition {
            entity,
            id: id.to_string(),
        }
    }

    pub fn no_stock(product: impl ToString) -> Self {
        Self::NoStock {
            product: product.to_string(),
        }
    }

    /// Equal-state requests are benign no-ops for almost every caller.
    pub fn is_equal_state(&self) -> bool {
        matches!(self, Self::EqualState { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleTransition { .. })
    }

    /// Bad-request class: the target entity cannot accept the operation in its
    /// current state (expired, cancelled, moved, missing).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::IllegalTransition { .. }
                | Self::StaleTransition { .. }
                | Self::NotFound { .. }
        )
    }
}
