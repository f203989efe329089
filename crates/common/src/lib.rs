//! Shared types for the order fulfillment system.

pub mod actor;
pub mod ids;
pub mod money;
pub mod payment;

pub use actor::{Actor, ParseEnumError, Role};
pub use ids::{AggregateId, OrderId, PaymentId, ProductId, UserId, VariantId, WarehouseId};
pub use money::{CURRENCY_SCALE, Money};
pub use payment::{PaymentMethod, PaymentStatus};
