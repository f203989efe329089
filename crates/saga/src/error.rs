//! Saga error types.

use domain::{DomainError, OrderError};
use ledger::LedgerError;
use projections::ProjectionError;
use thiserror::Error;

/// Errors surfaced by the coordinator.
///
/// Lower-layer errors are folded into this taxonomy so callers can map each
/// variant to one response without looking further down.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Malformed input or a non-positive amount.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The actor's role or ownership does not permit the action.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InsufficientStock(String),

    #[error("{0}")]
    InsufficientFunds(String),

    /// A compliance cap would be exceeded.
    #[error("{0}")]
    LimitExceeded(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    InvalidState(String),

    /// Duplicate refund, acknowledgement or payment.
    #[error("{0}")]
    AlreadyProcessed(String),

    /// Optimistic concurrency retries were exhausted.
    #[error("{0}")]
    Conflict(String),

    /// Storage or the payment rail is unreachable.
    #[error("{0}")]
    Dependency(String),

    /// No actor was established for the request.
    #[error("{0}")]
    Unauthorized(String),
}

impl SagaError {
    pub fn validation(message: impl Into<String>) -> Self {
        SagaError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        SagaError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        SagaError::Forbidden(message.into())
    }

    /// Short machine name, used as a metric label and log field.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::Validation(_) => "validation",
            SagaError::NotFound(_) => "not_found",
            SagaError::Forbidden(_) => "forbidden",
            SagaError::InsufficientStock(_) => "insufficient_stock",
            SagaError::InsufficientFunds(_) => "insufficient_funds",
            SagaError::LimitExceeded(_) => "limit_exceeded",
            SagaError::InvalidTransition(_) => "invalid_transition",
            SagaError::InvalidState(_) => "invalid_state",
            SagaError::AlreadyProcessed(_) => "already_processed",
            SagaError::Conflict(_) => "conflict",
            SagaError::Dependency(_) => "dependency",
            SagaError::Unauthorized(_) => "unauthorized",
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SagaError::Dependency(_) | SagaError::Conflict(_))
    }
}

impl From<LedgerError> for SagaError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InsufficientStock { .. } => SagaError::InsufficientStock(message),
            LedgerError::InsufficientFunds { .. } => SagaError::InsufficientFunds(message),
            LedgerError::LimitExceeded { .. } => SagaError::LimitExceeded(message),
            LedgerError::NotFound { .. } => SagaError::NotFound(message),
            LedgerError::Validation(m) => SagaError::Validation(m),
            LedgerError::InvalidState(m) => SagaError::InvalidState(m),
            LedgerError::AlreadyProcessed(m) => SagaError::AlreadyProcessed(m),
            LedgerError::Database(e) => {
                tracing::error!(error = %e, "ledger storage failure");
                SagaError::Dependency("ledger storage is unavailable".to_string())
            }
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::NoItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::MissingAddressField { .. } => SagaError::Validation(message),
            OrderError::InvalidTransition { .. } | OrderError::Cancelled => {
                SagaError::InvalidTransition(message)
            }
            OrderError::Forbidden { .. } => SagaError::Forbidden(message),
            OrderError::AlreadyPaid { .. } => SagaError::AlreadyProcessed(message),
            OrderError::NotPlaced => SagaError::NotFound("Order not found".to_string()),
            OrderError::AlreadyPlaced => SagaError::Conflict(message),
            OrderError::NoCompensationOutstanding => SagaError::InvalidState(message),
        }
    }
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        if err.is_conflict() {
            return SagaError::Conflict("Order was modified concurrently, please retry".to_string());
        }
        match err {
            DomainError::Order(e) => e.into(),
            DomainError::AggregateNotFound { aggregate_id, .. } => {
                SagaError::NotFound(format!("Order not found: {aggregate_id}"))
            }
            other => {
                tracing::error!(error = %other, "order storage failure");
                SagaError::Dependency("order storage is unavailable".to_string())
            }
        }
    }
}

impl From<ProjectionError> for SagaError {
    fn from(err: ProjectionError) -> Self {
        tracing::error!(error = %err, "projection catch-up failed");
        SagaError::Dependency("order listing is unavailable".to_string())
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
