//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, Money, PaymentId, PaymentMethod, PaymentStatus, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::policy::{self, Action, Resource};

use super::{
    Address, CompensationState, FulfillmentStatus, OrderError, OrderEvent, OrderItem, OrderNumber,
    OrderStatus, OrderTotals, PlaceOrder, PricingPolicy, StatusHistoryEntry, StatusTimestamps,
    events::{OrderPlacedData, StatusChangedData},
};

/// Order aggregate root.
///
/// Represents an order from placement through delivery or cancellation,
/// including the bookkeeping of its payment and of the compensation that
/// follows a cancellation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_number: OrderNumber,
    customer_id: UserId,
    retailer_id: UserId,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    payment_id: Option<PaymentId>,
    fulfillment_status: FulfillmentStatus,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    customer_notes: Option<String>,
    cancellation_reason: Option<String>,
    timestamps: StatusTimestamps,
    history: Vec<StatusHistoryEntry>,
    reservation_committed: bool,
    compensation: CompensationState,
    compensation_error: Option<String>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_placed(data),
            OrderEvent::StatusChanged(data) => self.apply_status_changed(data),
            OrderEvent::PaymentUpdated(data) => {
                self.payment_status = data.status;
                if data.payment_id.is_some() {
                    self.payment_id = data.payment_id;
                }
                self.timestamps.updated_at = Some(data.updated_at);
            }
            OrderEvent::ReservationCommitted(data) => {
                self.reservation_committed = true;
                self.timestamps.updated_at = Some(data.committed_at);
            }
            OrderEvent::CompensationCompleted(data) => {
                self.compensation = CompensationState::Completed;
                self.compensation_error = None;
                if data.refunded_amount.is_some() {
                    self.payment_status = PaymentStatus::Refunded;
                }
                self.timestamps.updated_at = Some(data.completed_at);
            }
            OrderEvent::CompensationFailed(data) => {
                self.compensation = CompensationState::Failed;
                self.compensation_error = Some(format!("{}: {}", data.step, data.error));
                self.timestamps.updated_at = Some(data.failed_at);
            }
        }
    }
}

// Query methods
impl Order {
    pub fn order_number(&self) -> &OrderNumber {
        &self.order_number
    }

    pub fn customer_id(&self) -> UserId {
        self.customer_id
    }

    pub fn retailer_id(&self) -> UserId {
        self.retailer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn fulfillment_status(&self) -> FulfillmentStatus {
        self.fulfillment_status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the total quantity across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn total_amount(&self) -> Money {
        self.totals.total_amount
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn customer_notes(&self) -> Option<&str> {
        self.customer_notes.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn timestamps(&self) -> &StatusTimestamps {
        &self.timestamps
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamps.created_at
    }

    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.history
    }

    pub fn reservation_committed(&self) -> bool {
        self.reservation_committed
    }

    pub fn compensation(&self) -> CompensationState {
        self.compensation
    }

    /// The last compensation failure, cleared once compensation completes.
    pub fn compensation_error(&self) -> Option<&str> {
        self.compensation_error.as_deref()
    }

    pub fn is_placed(&self) -> bool {
        self.id.is_some()
    }

    /// The policy view of this order.
    pub fn as_resource(&self) -> Resource {
        Resource::Order {
            customer_id: self.customer_id,
            retailer_id: self.retailer_id,
            status: self.status,
        }
    }

    /// The policy view of this order's payment.
    pub fn payment_resource(&self) -> Resource {
        Resource::Payment {
            payer_id: self.customer_id,
            retailer_id: self.retailer_id,
        }
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order, pricing its lines with `pricing`.
    pub fn place(
        &self,
        cmd: &PlaceOrder,
        pricing: &PricingPolicy,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        cmd.validate()?;

        let placed_at = Utc::now();
        Ok(vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_id: cmd.order_id,
            order_number: OrderNumber::generate(placed_at),
            customer_id: cmd.customer_id,
            retailer_id: cmd.retailer_id,
            items: cmd.items.clone(),
            totals: pricing.price(&cmd.items),
            shipping_address: cmd.shipping_address.clone(),
            billing_address: cmd
                .billing_address
                .clone()
                .unwrap_or_else(|| cmd.shipping_address.clone()),
            payment_method: cmd.payment_method,
            customer_notes: cmd.customer_notes.clone(),
            placed_at,
        })])
    }

    /// Moves the order to `to` on behalf of `actor`.
    ///
    /// Authorization is checked before the transition table, so a customer
    /// asking for a forbidden status gets `Forbidden` rather than a hint about
    /// the state machine.
    pub fn change_status(
        &self,
        actor: &Actor,
        to: OrderStatus,
        notes: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotPlaced);
        }

        if !policy::allow(actor, Action::UpdateOrderStatus(to), &self.as_resource()) {
            return Err(OrderError::Forbidden {
                action: "update the status of",
            });
        }

        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let cancellation_reason = (to == OrderStatus::Cancelled).then(|| {
            notes
                .clone()
                .unwrap_or_else(|| format!("Cancelled by {}", actor.role))
        });

        Ok(vec![OrderEvent::status_changed(
            self.status,
            to,
            actor.id,
            notes,
            cancellation_reason,
        )])
    }

    /// Records a payment outcome. Repeating the current outcome is a no-op.
    pub fn record_payment(
        &self,
        payment_id: Option<PaymentId>,
        status: PaymentStatus,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotPlaced);
        }

        if status == self.payment_status && (payment_id.is_none() || payment_id == self.payment_id)
        {
            return Ok(vec![]);
        }

        if matches!(status, PaymentStatus::Processing | PaymentStatus::Completed) {
            if self.status == OrderStatus::Cancelled {
                return Err(OrderError::Cancelled);
            }
            if self.payment_status.is_settled() && self.payment_id != payment_id {
                return Err(OrderError::AlreadyPaid {
                    status: self.payment_status,
                });
            }
        }

        Ok(vec![OrderEvent::payment_updated(payment_id, status)])
    }

    /// Marks the reserved stock as consumed. Idempotent.
    pub fn commit_reservation(&self) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotPlaced);
        }
        if self.reservation_committed {
            return Ok(vec![]);
        }
        if self.status == OrderStatus::Cancelled {
            return Err(OrderError::Cancelled);
        }
        Ok(vec![OrderEvent::reservation_committed()])
    }

    pub fn complete_compensation(
        &self,
        released_quantity: u64,
        refunded_amount: Option<Money>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.compensation.is_outstanding() {
            return Err(OrderError::NoCompensationOutstanding);
        }
        Ok(vec![OrderEvent::compensation_completed(
            released_quantity,
            refunded_amount,
        )])
    }

    pub fn fail_compensation(
        &self,
        step: &str,
        error: &str,
        attempts: u32,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.compensation.is_outstanding() {
            return Err(OrderError::NoCompensationOutstanding);
        }
        Ok(vec![OrderEvent::compensation_failed(step, error, attempts)])
    }
}

// Event application helpers
impl Order {
    fn apply_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.order_number = data.order_number;
        self.customer_id = data.customer_id;
        self.retailer_id = data.retailer_id;
        self.status = OrderStatus::Pending;
        self.payment_status = PaymentStatus::Pending;
        self.payment_method = data.payment_method;
        self.items = data.items;
        self.totals = data.totals;
        self.shipping_address = Some(data.shipping_address);
        self.billing_address = Some(data.billing_address);
        self.customer_notes = data.customer_notes;
        self.timestamps.created_at = Some(data.placed_at);
        self.timestamps.updated_at = Some(data.placed_at);
        self.history.push(StatusHistoryEntry {
            from: None,
            to: OrderStatus::Pending,
            changed_by: data.customer_id,
            notes: None,
            at: data.placed_at,
        });
    }

    fn apply_status_changed(&mut self, data: StatusChangedData) {
        let at = data.changed_at;
        self.status = data.to;
        self.timestamps.updated_at = Some(at);

        match data.to {
            OrderStatus::Confirmed => self.timestamps.confirmed_at = Some(at),
            OrderStatus::OutForDelivery => self.timestamps.shipped_at = Some(at),
            OrderStatus::Delivered => {
                self.timestamps.delivered_at = Some(at);
                self.fulfillment_status = FulfillmentStatus::Fulfilled;
            }
            OrderStatus::Cancelled => {
                self.timestamps.cancelled_at = Some(at);
                self.cancellation_reason = data.cancellation_reason;
                self.compensation = CompensationState::Pending;
            }
            OrderStatus::Pending | OrderStatus::Processing | OrderStatus::ReadyForPickup => {}
        }

        self.history.push(StatusHistoryEntry {
            from: Some(data.from),
            to: data.to,
            changed_by: data.changed_by,
            notes: data.notes,
            at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ProductId, Role, WarehouseId};

    fn address() -> Address {
        Address {
            recipient_name: "Mutale Banda".to_string(),
            phone: "+260971111111".to_string(),
            address_line1: "14 Cairo Road".to_string(),
            address_line2: None,
            city: "Lusaka".to_string(),
            province: "Lusaka".to_string(),
            postal_code: None,
            latitude: None,
            longitude: None,
            delivery_instructions: None,
        }
    }

    fn place_command(customer: UserId, retailer: UserId) -> PlaceOrder {
        PlaceOrder {
            order_id: AggregateId::new(),
            customer_id: customer,
            retailer_id: retailer,
            items: vec![OrderItem::new(
                ProductId::new(),
                WarehouseId::new(),
                "Cooking oil 5L",
                2,
                Money::from_major(100),
            )],
            shipping_address: address(),
            billing_address: None,
            payment_method: PaymentMethod::Wallet,
            customer_notes: None,
        }
    }

    struct Fixture {
        order: Order,
        customer: Actor,
        retailer: Actor,
    }

    fn placed_order() -> Fixture {
        let customer = Actor::new(UserId::new(), Role::Customer);
        let retailer = Actor::new(UserId::new(), Role::Retailer);
        let mut order = Order::default();
        let events = order
            .place(
                &place_command(customer.id, retailer.id),
                &PricingPolicy::default(),
            )
            .unwrap();
        order.apply_events(events);
        Fixture {
            order,
            customer,
            retailer,
        }
    }

    fn transition(order: &mut Order, actor: &Actor, to: OrderStatus) {
        let events = order.change_status(actor, to, None).unwrap();
        order.apply_events(events);
    }

    #[test]
    fn place_prices_and_starts_pending() {
        let Fixture { order, customer, .. } = placed_order();

        assert!(order.is_placed());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.total_amount(), Money::from_major(257));
        assert_eq!(order.customer_id(), customer.id);
        assert_eq!(order.billing_address(), order.shipping_address());
        assert_eq!(order.history().len(), 1);
        assert!(order.order_number().as_str().starts_with("ORD-"));
    }

    #[test]
    fn place_twice_is_rejected() {
        let Fixture {
            order,
            customer,
            retailer,
        } = placed_order();
        let result = order.place(
            &place_command(customer.id, retailer.id),
            &PricingPolicy::default(),
        );
        assert!(matches!(result, Err(OrderError::AlreadyPlaced)));
    }

    #[test]
    fn place_rejects_empty_and_zero_quantity() {
        let order = Order::default();
        let mut cmd = place_command(UserId::new(), UserId::new());
        cmd.items.clear();
        assert!(matches!(
            order.place(&cmd, &PricingPolicy::default()),
            Err(OrderError::NoItems)
        ));

        let mut cmd = place_command(UserId::new(), UserId::new());
        cmd.items[0].quantity = 0;
        assert!(matches!(
            order.place(&cmd, &PricingPolicy::default()),
            Err(OrderError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn full_lifecycle_stamps_timestamps() {
        let Fixture {
            mut order,
            retailer,
            ..
        } = placed_order();

        transition(&mut order, &retailer, OrderStatus::Confirmed);
        assert!(order.timestamps().confirmed_at.is_some());
        transition(&mut order, &retailer, OrderStatus::Processing);
        transition(&mut order, &retailer, OrderStatus::ReadyForPickup);
        transition(&mut order, &retailer, OrderStatus::OutForDelivery);
        assert!(order.timestamps().shipped_at.is_some());
        transition(&mut order, &retailer, OrderStatus::Delivered);

        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.timestamps().delivered_at.is_some());
        assert_eq!(order.fulfillment_status(), FulfillmentStatus::Fulfilled);
        assert_eq!(order.history().len(), 6);
    }

    #[test]
    fn pending_to_out_for_delivery_is_invalid() {
        let Fixture { order, retailer, .. } = placed_order();
        let result = order.change_status(&retailer, OrderStatus::OutForDelivery, None);
        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::OutForDelivery
            })
        ));
    }

    #[test]
    fn customer_cancel_opens_compensation() {
        let Fixture {
            mut order,
            customer,
            ..
        } = placed_order();

        let events = order
            .change_status(&customer, OrderStatus::Cancelled, None)
            .unwrap();
        order.apply_events(events);

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.compensation(), CompensationState::Pending);
        assert_eq!(order.cancellation_reason(), Some("Cancelled by customer"));
        assert!(order.timestamps().cancelled_at.is_some());
    }

    #[test]
    fn customer_cannot_confirm() {
        let Fixture { order, customer, .. } = placed_order();
        let result = order.change_status(&customer, OrderStatus::Confirmed, None);
        assert!(matches!(result, Err(OrderError::Forbidden { .. })));
    }

    #[test]
    fn authorization_is_checked_before_transition_table() {
        let Fixture {
            mut order,
            customer,
            retailer,
        } = placed_order();
        transition(&mut order, &retailer, OrderStatus::Confirmed);

        // Cancelling a confirmed order is a legal transition, but not for a customer.
        let result = order.change_status(&customer, OrderStatus::Cancelled, None);
        assert!(matches!(result, Err(OrderError::Forbidden { .. })));

        let stranger = Actor::new(UserId::new(), Role::Retailer);
        let result = order.change_status(&stranger, OrderStatus::Delivered, None);
        assert!(matches!(result, Err(OrderError::Forbidden { .. })));
    }

    #[test]
    fn payment_recording_is_idempotent_and_guarded() {
        let Fixture { mut order, .. } = placed_order();
        let payment_id = PaymentId::new();

        let events = order
            .record_payment(Some(payment_id), PaymentStatus::Completed)
            .unwrap();
        order.apply_events(events);
        assert_eq!(order.payment_status(), PaymentStatus::Completed);
        assert_eq!(order.payment_id(), Some(payment_id));

        assert!(
            order
                .record_payment(Some(payment_id), PaymentStatus::Completed)
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            order.record_payment(Some(PaymentId::new()), PaymentStatus::Completed),
            Err(OrderError::AlreadyPaid { .. })
        ));
    }

    #[test]
    fn cancelled_order_cannot_be_paid_or_committed() {
        let Fixture {
            mut order,
            customer,
            ..
        } = placed_order();
        transition(&mut order, &customer, OrderStatus::Cancelled);

        assert!(matches!(
            order.record_payment(Some(PaymentId::new()), PaymentStatus::Completed),
            Err(OrderError::Cancelled)
        ));
        assert!(matches!(
            order.commit_reservation(),
            Err(OrderError::Cancelled)
        ));
    }

    #[test]
    fn compensation_with_refund_marks_payment_refunded() {
        let Fixture {
            mut order,
            retailer,
            ..
        } = placed_order();
        order.apply_events(
            order
                .record_payment(Some(PaymentId::new()), PaymentStatus::Completed)
                .unwrap(),
        );
        transition(&mut order, &retailer, OrderStatus::Confirmed);
        transition(&mut order, &retailer, OrderStatus::Cancelled);

        let failed = order.fail_compensation("refund_payment", "wallet offline", 3).unwrap();
        order.apply_events(failed);
        assert_eq!(order.compensation(), CompensationState::Failed);
        assert_eq!(order.compensation_error(), Some("refund_payment: wallet offline"));

        let done = order
            .complete_compensation(2, Some(order.total_amount()))
            .unwrap();
        order.apply_events(done);
        assert_eq!(order.compensation(), CompensationState::Completed);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert!(matches!(
            order.complete_compensation(0, None),
            Err(OrderError::NoCompensationOutstanding)
        ));
    }

    #[test]
    fn commit_reservation_is_idempotent() {
        let Fixture { mut order, .. } = placed_order();
        order.apply_events(order.commit_reservation().unwrap());
        assert!(order.reservation_committed());
        assert!(order.commit_reservation().unwrap().is_empty());
    }
}
