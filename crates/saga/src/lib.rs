//! Order fulfillment saga.
//!
//! [`OrderSagaCoordinator`] prices and reserves stock for new orders, drives
//! the order status state machine, captures payment through the wallet
//! ledger and compensates (release stock, refund money) on cancellation.
//! Notifications leave through a fire-and-forget [`NotificationDispatcher`].

pub mod catalog;
mod compensation;
pub mod coordinator;
pub mod error;
pub mod notifications;
mod operations;
mod payments;

pub use catalog::{InMemoryCatalog, PricedProduct, Product, ProductCatalog, ProductVariant};
pub use compensation::RecoveryReport;
pub use coordinator::{
    CoordinatorConfig, CreateOrder, OrderLine, OrderReceipt, OrderSagaCoordinator,
};
pub use error::{Result, SagaError};
pub use notifications::{
    ConnectionRegistry, Notification, NotificationDispatcher, NotificationSink, NotificationType,
    QueueConfig, QueueDispatcher, RecordingSink, RegistrySink, SessionId, WorkerHandle,
};
pub use operations::StockAdjustment;
pub use payments::PaymentRequest;
