//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money, PaymentId, PaymentMethod, PaymentStatus, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Address, OrderItem, OrderNumber, OrderStatus, OrderTotals};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was validated, priced, reserved and persisted.
    OrderPlaced(OrderPlacedData),

    /// Status moved along the state machine.
    StatusChanged(StatusChangedData),

    /// Payment was captured, failed, confirmed or refunded.
    PaymentUpdated(PaymentUpdatedData),

    /// Reserved stock was converted into consumed stock.
    ReservationCommitted(ReservationCommittedData),

    /// Reservations were released and any refund issued after cancellation.
    CompensationCompleted(CompensationCompletedData),

    /// Compensation gave up after its retries; recovery will try again.
    CompensationFailed(CompensationFailedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StatusChanged(_) => "StatusChanged",
            OrderEvent::PaymentUpdated(_) => "PaymentUpdated",
            OrderEvent::ReservationCommitted(_) => "ReservationCommitted",
            OrderEvent::CompensationCompleted(_) => "CompensationCompleted",
            OrderEvent::CompensationFailed(_) => "CompensationFailed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub order_number: OrderNumber,
    pub customer_id: UserId,
    pub retailer_id: UserId,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub payment_method: PaymentMethod,
    pub customer_notes: Option<String>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_by: UserId,
    pub notes: Option<String>,
    /// Set when `to` is `Cancelled`.
    pub cancellation_reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentUpdatedData {
    pub payment_id: Option<PaymentId>,
    pub status: PaymentStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCommittedData {
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationCompletedData {
    /// Units returned to available stock.
    pub released_quantity: u64,
    /// Amount credited back to the customer, if a refund was due.
    pub refunded_amount: Option<Money>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationFailedData {
    /// Which step gave up: `release_stock` or `refund_payment`.
    pub step: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn status_changed(
        from: OrderStatus,
        to: OrderStatus,
        changed_by: UserId,
        notes: Option<String>,
        cancellation_reason: Option<String>,
    ) -> Self {
        OrderEvent::StatusChanged(StatusChangedData {
            from,
            to,
            changed_by,
            notes,
            cancellation_reason,
            changed_at: Utc::now(),
        })
    }

    pub fn payment_updated(payment_id: Option<PaymentId>, status: PaymentStatus) -> Self {
        OrderEvent::PaymentUpdated(PaymentUpdatedData {
            payment_id,
            status,
            updated_at: Utc::now(),
        })
    }

    pub fn reservation_committed() -> Self {
        OrderEvent::ReservationCommitted(ReservationCommittedData {
            committed_at: Utc::now(),
        })
    }

    pub fn compensation_completed(released_quantity: u64, refunded_amount: Option<Money>) -> Self {
        OrderEvent::CompensationCompleted(CompensationCompletedData {
            released_quantity,
            refunded_amount,
            completed_at: Utc::now(),
        })
    }

    pub fn compensation_failed(
        step: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        OrderEvent::CompensationFailed(CompensationFailedData {
            step: step.into(),
            error: error.into(),
            attempts,
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = OrderEvent::status_changed(
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            UserId::new(),
            None,
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StatusChanged");
        assert_eq!(json["data"]["to"], "confirmed");
        assert_eq!(event.event_type(), "StatusChanged");
    }

    #[test]
    fn payment_event_carries_wire_status() {
        let event = OrderEvent::payment_updated(Some(PaymentId::new()), PaymentStatus::Completed);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["status"], "completed");
    }
}
