//! Domain layer for the order fulfillment system.
//!
//! This crate provides:
//! - Aggregate trait for event-sourced entities
//! - DomainEvent trait for domain events
//! - Command trait and a CommandHandler with optimistic-concurrency retries
//! - The order aggregate with its status state machine and pricing
//! - The authorization policy shared by every entry point

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;
pub mod policy;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult, DEFAULT_MAX_ATTEMPTS};
pub use error::{DomainError, Result};
pub use order::{
    Address, ChangeStatus, CompensationState, FulfillmentStatus, Order, OrderError, OrderEvent,
    OrderItem, OrderNumber, OrderService, OrderStatus, OrderTotals, PlaceOrder, PricingPolicy,
    RecordPayment, StatusHistoryEntry, StatusTimestamps,
};
pub use policy::{Action, Resource};
