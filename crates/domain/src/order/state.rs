//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// ```text
/// Pending ──► Confirmed ──► Processing ──► ReadyForPickup ──► OutForDelivery ──► Delivered
///    │            │              │
///    └────────────┴──────────────┴──► Cancelled
/// ```
///
/// `Delivered` and `Cancelled` are terminal. Once an order is ready for
/// pickup it can no longer be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Statuses reachable in one step from `self`.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::ReadyForPickup, OrderStatus::Cancelled],
            OrderStatus::ReadyForPickup => &[OrderStatus::OutForDelivery],
            OrderStatus::OutForDelivery => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn can_cancel(&self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = common::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| common::ParseEnumError::new("order status", s))
    }
}

/// Whether the goods have reached the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    #[default]
    Unfulfilled,
    Fulfilled,
}

/// Progress of the release/refund compensation that follows a cancellation.
///
/// ```text
/// NotRequired ──(cancelled)──► Pending ──┬──► Completed
///                                 ▲      │
///                                 └──────┴──► Failed (retried by recovery)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompensationState {
    #[default]
    NotRequired,
    Pending,
    Completed,
    Failed,
}

impl CompensationState {
    /// Returns true while stock or money may still need to be returned.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, CompensationState::Pending | CompensationState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationState::NotRequired => "not_required",
            CompensationState::Pending => "pending",
            CompensationState::Completed => "completed",
            CompensationState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CompensationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
