//! Read model views.

mod order_summary;

pub use order_summary::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, OrderQuery, OrderSummary, OrderSummaryView,
};
