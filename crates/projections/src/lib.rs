//! Query side of the order fulfillment system.
//!
//! - [`Projection`] folds events from the global log into a read model
//! - [`ProjectionProcessor`] feeds events from the store to projections
//! - [`OrderSummaryView`] backs order listing

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{OrderQuery, OrderSummary, OrderSummaryView};
