//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod pricing;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    CompensationCompletedData, CompensationFailedData, OrderEvent, OrderPlacedData,
    PaymentUpdatedData, ReservationCommittedData, StatusChangedData,
};
pub use pricing::PricingPolicy;
pub use service::OrderService;
pub use state::{CompensationState, FulfillmentStatus, OrderStatus};
pub use value_objects::{
    Address, OrderItem, OrderNumber, OrderTotals, StatusHistoryEntry, StatusTimestamps,
};

use common::PaymentStatus;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order stream already holds an `OrderPlaced` event.
    #[error("Order already placed")]
    AlreadyPlaced,

    /// The command targets an order that was never placed.
    #[error("Order has not been placed")]
    NotPlaced,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A required address field is empty.
    #[error("Address field '{field}' is required")]
    MissingAddressField { field: &'static str },

    /// The state machine does not allow this move.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The actor is not allowed to perform the action on this order.
    #[error("Not allowed to {action} this order")]
    Forbidden { action: &'static str },

    /// A payment was already captured for the order.
    #[error("Order payment is already {status}")]
    AlreadyPaid { status: PaymentStatus },

    /// The order is cancelled and can no longer be paid or committed.
    #[error("Order is cancelled")]
    Cancelled,

    /// Compensation bookkeeping on an order that does not need it.
    #[error("Order has no outstanding compensation")]
    NoCompensationOutstanding,
}
