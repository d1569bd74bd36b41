//! Error taxonomy for the compliance core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether a caller may reasonably retry the operation that produced
    /// this error. Validation, NotFound, and Conflict are never retryable;
    /// everything tied to a transient dependency state is.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable(_) | Self::CircuitOpen(_) | Self::Timeout(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::Timeout(_) => "TIMEOUT",
            Self::Canceled(_) => "CANCELED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<exchange_support::ExchangeError> for CoreError {
    fn from(err: exchange_support::ExchangeError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<crate::store::StoreError> for CoreError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError::*;
        match err {
            NotFound(m) => CoreError::NotFound(m),
            Duplicate(m) | Constraint(m) => CoreError::Conflict(m),
            Unavailable(m) => CoreError::DependencyUnavailable(m),
        }
    }
}

impl From<crate::provider::ProviderError> for CoreError {
    fn from(err: crate::provider::ProviderError) -> Self {
        use crate::provider::ProviderError::*;
        match err {
            RateLimitExceeded(m) => CoreError::DependencyUnavailable(m),
            Unavailable(m) | Protocol(m) => CoreError::DependencyUnavailable(m),
            InvalidConfig(m) => CoreError::Validation(m),
            Timeout(m) => CoreError::Timeout(m),
        }
    }
}
