use common::{Money, ProductId, UserId, WarehouseId};
use thiserror::Error;

/// Errors raised by the inventory and wallet ledgers.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "Insufficient stock for product {product_id} in warehouse {warehouse_id}: \
         requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        requested: i64,
        available: i64,
    },

    #[error("Insufficient funds for {user_id}: requested {requested}, balance {available}")]
    InsufficientFunds {
        user_id: UserId,
        requested: Money,
        available: Money,
    },

    /// A compliance cap would be exceeded.
    #[error(
        "Daily {transaction_type} limit of {limit} exceeded: \
         {used} used today, {requested} requested"
    )]
    LimitExceeded {
        transaction_type: &'static str,
        limit: Money,
        used: Money,
        requested: Money,
    },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The entity exists but is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The operation was already applied (duplicate refund or acknowledgement).
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    /// Returns true for storage failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Maps a column that failed to parse into a sqlx decode error.
pub(crate) fn decode_error(e: impl std::error::Error + Send + Sync + 'static) -> LedgerError {
    LedgerError::Database(sqlx::Error::Decode(Box::new(e)))
}
