//! Lifecycle error model and the user-facing error report.

use storefront_core::DomainError;
use thiserror::Error;
use uuid::Uuid;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Error returned by stores, collaborators and lifecycle services.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// Business failure; callers inspect the kind to decide cascades.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error in {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    /// The payment provider could not be queried.
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The notification channel refused or failed a message.
    #[error("notification failed: {0}")]
    Notification(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LifecycleError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_equal_state(&self) -> bool {
        self.domain().is_some_and(DomainError::is_equal_state)
    }

    pub fn is_stale(&self) -> bool {
        self.domain().is_some_and(DomainError::is_stale)
    }

    /// Bad-request class failures (see [`DomainError::is_rejection`]).
    pub fn is_rejection(&self) -> bool {
        self.domain().is_some_and(DomainError::is_rejection)
    }
}

/// Error as shown to a customer.
///
/// The full error stays in the server log under `correlation_id`; `message`
/// never carries internal detail.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PublicError {
    pub correlation_id: Uuid,
    pub message: String,
}

impl PublicError {
    pub fn from_error(err: &LifecycleError) -> Self {
        let correlation_id = Uuid::now_v7();
        tracing::error!(correlation_id = %correlation_id, error = %err, "request failed");

        let message = match err.domain() {
            Some(DomainError::NoStock { .. }) => "This product is out of stock".to_string(),
            Some(DomainError::StaleTransition { .. }) => "This booking has expired".to_string(),
            _ => format!(
                "Something went wrong, try again or contact support (ref {correlation_id})"
            ),
        };

        Self {
            correlation_id,
            message,
        }
    }
}
