//! Order commands.

use common::{Actor, AggregateId, PaymentId, PaymentMethod, PaymentStatus, UserId};

use crate::command::Command;

use super::{Address, Order, OrderError, OrderItem, OrderStatus};

/// Command to place a new order with already allocated lines.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub customer_id: UserId,
    pub retailer_id: UserId,
    /// Lines split per warehouse, with price snapshots.
    pub items: Vec<OrderItem>,
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    pub customer_notes: Option<String>,
}

impl PlaceOrder {
    /// Checks the lines and addresses without touching any state.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = self.items.iter().find(|item| item.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }
        self.shipping_address.validate()?;
        if let Some(billing) = &self.billing_address {
            billing.validate()?;
        }
        Ok(())
    }
}

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to move an order along its state machine.
#[derive(Debug, Clone)]
pub struct ChangeStatus {
    pub order_id: AggregateId,
    pub actor: Actor,
    pub status: OrderStatus,
    pub notes: Option<String>,
}

impl ChangeStatus {
    pub fn new(order_id: AggregateId, actor: Actor, status: OrderStatus) -> Self {
        Self {
            order_id,
            actor,
            status,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

impl Command for ChangeStatus {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record the outcome of a payment against an order.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub order_id: AggregateId,
    pub payment_id: Option<PaymentId>,
    pub status: PaymentStatus,
}

impl RecordPayment {
    pub fn new(
        order_id: AggregateId,
        payment_id: Option<PaymentId>,
        status: PaymentStatus,
    ) -> Self {
        Self {
            order_id,
            payment_id,
            status,
        }
    }
}

impl Command for RecordPayment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
