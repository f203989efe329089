//! Order summaries for listing, filtered by customer, retailer and status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Money, PaymentId, PaymentStatus, UserId};
use domain::{OrderEvent, OrderNumber, OrderStatus};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Denormalized row for one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub order_number: OrderNumber,
    pub customer_id: UserId,
    pub retailer_id: UserId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<PaymentId>,
    pub total_amount: Money,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stream version of the last event folded in.
    #[serde(skip)]
    pub version: i64,
}

/// Filter and page for [`OrderSummaryView::query`].
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    pub customer_id: Option<UserId>,
    pub retailer_id: Option<UserId>,
    pub status: Option<OrderStatus>,
    /// Defaults to 20, capped at 100.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl OrderQuery {
    pub fn for_customer(customer_id: UserId) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Self::default()
        }
    }

    pub fn for_retailer(retailer_id: UserId) -> Self {
        Self {
            retailer_id: Some(retailer_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Option<OrderStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn page(mut self, limit: Option<usize>, offset: Option<usize>) -> Self {
        self.limit = limit;
        self.offset = offset.unwrap_or(0);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn matches(&self, summary: &OrderSummary) -> bool {
        self.customer_id.is_none_or(|id| summary.customer_id == id)
            && self.retailer_id.is_none_or(|id| summary.retailer_id == id)
            && self.status.is_none_or(|status| summary.status == status)
    }
}

/// Read model over the order stream, newest orders first.
///
/// Events at or below a summary's stored version are skipped, so replaying a
/// stream is harmless.
#[derive(Clone)]
pub struct OrderSummaryView {
    orders: Arc<RwLock<HashMap<AggregateId, OrderSummary>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl OrderSummaryView {
    pub fn new() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            position: Arc::new(RwLock::new(ProjectionPosition::zero())),
        }
    }

    pub async fn get(&self, order_id: AggregateId) -> Option<OrderSummary> {
        self.orders.read().await.get(&order_id).cloned()
    }

    pub async fn query(&self, query: &OrderQuery) -> Vec<OrderSummary> {
        let orders = self.orders.read().await;
        let mut matching: Vec<_> = orders.values().filter(|s| query.matches(s)).cloned().collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_number.as_str().cmp(a.order_number.as_str()))
        });
        matching
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect()
    }

    fn apply(
        orders: &mut HashMap<AggregateId, OrderSummary>,
        envelope: &EventEnvelope,
        event: OrderEvent,
    ) {
        let version = envelope.version.as_i64();
        let order_id = envelope.aggregate_id;

        if let OrderEvent::OrderPlaced(data) = &event {
            if orders.contains_key(&order_id) {
                return;
            }
            orders.insert(
                order_id,
                OrderSummary {
                    order_id,
                    order_number: data.order_number.clone(),
                    customer_id: data.customer_id,
                    retailer_id: data.retailer_id,
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                    payment_id: None,
                    total_amount: data.totals.total_amount,
                    item_count: data.items.len(),
                    created_at: data.placed_at,
                    updated_at: data.placed_at,
                    version,
                },
            );
            return;
        }

        let Some(summary) = orders.get_mut(&order_id) else {
            tracing::warn!(%order_id, event_type = %envelope.event_type, "event for unknown order");
            return;
        };
        if version <= summary.version {
            return;
        }
        summary.version = version;
        summary.updated_at = envelope.timestamp;

        match event {
            OrderEvent::StatusChanged(data) => {
                summary.status = data.to;
            }
            OrderEvent::PaymentUpdated(data) => {
                summary.payment_status = data.status;
                if data.payment_id.is_some() {
                    summary.payment_id = data.payment_id;
                }
            }
            OrderEvent::CompensationCompleted(data) => {
                if data.refunded_amount.is_some() {
                    summary.payment_status = PaymentStatus::Refunded;
                }
            }
            OrderEvent::OrderPlaced(_)
            | OrderEvent::ReservationCommitted(_)
            | OrderEvent::CompensationFailed(_) => {}
        }
    }
}

impl Default for OrderSummaryView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for OrderSummaryView {
    fn name(&self) -> &'static str {
        "OrderSummaryView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type == "Order" {
            let order_event: OrderEvent = event.decode()?;
            let mut orders = self.orders.write().await;
            Self::apply(&mut orders, event, order_event);
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.orders.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for OrderSummaryView {
    fn name(&self) -> &'static str {
        "OrderSummaryView"
    }

    fn count(&self) -> usize {
        self.orders.try_read().map(|o| o.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{PaymentMethod, ProductId, WarehouseId};
    use domain::{Address, DomainEvent, OrderItem, OrderTotals};
    use domain::order::OrderPlacedData;
    use event_store::Version;

    fn envelope(order_id: AggregateId, version: i64, event: &OrderEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    fn address() -> Address {
        Address {
            recipient_name: "Mwila Banda".into(),
            phone: "+260970000000".into(),
            address_line1: "Plot 12 Cairo Rd".into(),
            address_line2: None,
            city: "Lusaka".into(),
            province: "Lusaka".into(),
            postal_code: None,
            latitude: None,
            longitude: None,
            delivery_instructions: None,
        }
    }

    fn placed(customer: UserId, retailer: UserId, placed_at: DateTime<Utc>) -> OrderEvent {
        let item = OrderItem::new(
            ProductId::new(),
            WarehouseId::new(),
            "Mealie meal",
            2,
            Money::from_major(100),
        );
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id: AggregateId::new(),
            order_number: OrderNumber::generate(placed_at),
            customer_id: customer,
            retailer_id: retailer,
            items: vec![item],
            totals: OrderTotals {
                subtotal: Money::from_major(200),
                tax_amount: Money::from_major(32),
                shipping_amount: Money::from_major(25),
                total_amount: Money::from_major(257),
            },
            shipping_address: address(),
            billing_address: address(),
            payment_method: PaymentMethod::Wallet,
            customer_notes: None,
            placed_at,
        })
    }

    #[tokio::test]
    async fn folds_placement_status_and_payment() {
        let view = OrderSummaryView::new();
        let order_id = AggregateId::new();
        let customer = UserId::new();
        let payment_id = PaymentId::new();

        view.handle(&envelope(order_id, 1, &placed(customer, UserId::new(), Utc::now())))
            .await
            .unwrap();
        view.handle(&envelope(
            order_id,
            2,
            &OrderEvent::status_changed(
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                customer,
                None,
                None,
            ),
        ))
        .await
        .unwrap();
        view.handle(&envelope(
            order_id,
            3,
            &OrderEvent::payment_updated(Some(payment_id), PaymentStatus::Completed),
        ))
        .await
        .unwrap();

        let summary = view.get(order_id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Confirmed);
        assert_eq!(summary.payment_status, PaymentStatus::Completed);
        assert_eq!(summary.payment_id, Some(payment_id));
        assert_eq!(summary.total_amount, Money::from_major(257));
        assert_eq!(summary.item_count, 1);
        assert_eq!(summary.version, 3);
        assert_eq!(view.position().await.events_seen, 3);
    }

    #[tokio::test]
    async fn replayed_events_are_skipped() {
        let view = OrderSummaryView::new();
        let order_id = AggregateId::new();
        let customer = UserId::new();
        let cancel = envelope(
            order_id,
            2,
            &OrderEvent::status_changed(
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                customer,
                None,
                None,
            ),
        );

        view.handle(&envelope(order_id, 1, &placed(customer, UserId::new(), Utc::now())))
            .await
            .unwrap();
        view.handle(&cancel).await.unwrap();
        view.handle(&envelope(
            order_id,
            3,
            &OrderEvent::compensation_completed(2, Some(Money::from_major(257))),
        ))
        .await
        .unwrap();
        view.handle(&cancel).await.unwrap();

        let summary = view.get(order_id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Cancelled);
        assert_eq!(summary.payment_status, PaymentStatus::Refunded);
        assert_eq!(summary.version, 3);
    }

    #[tokio::test]
    async fn query_filters_sorts_and_pages() {
        let view = OrderSummaryView::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let retailer = UserId::new();
        let start = Utc::now();

        let mut alice_orders = Vec::new();
        for i in 0..3 {
            let order_id = AggregateId::new();
            alice_orders.push(order_id);
            view.handle(
                &envelope(order_id, 1, &placed(alice, retailer, start + Duration::minutes(i))),
            )
                .await
                .unwrap();
        }
        view.handle(&envelope(AggregateId::new(), 1, &placed(bob, UserId::new(), start)))
            .await
            .unwrap();
        view.handle(&envelope(
            alice_orders[0],
            2,
            &OrderEvent::status_changed(
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                retailer,
                None,
                None,
            ),
        ))
        .await
        .unwrap();

        let mine = view.query(&OrderQuery::for_customer(alice)).await;
        assert_eq!(mine.len(), 3);
        assert_eq!(mine[0].order_id, alice_orders[2]);

        let confirmed = view
            .query(&OrderQuery::for_retailer(retailer).with_status(Some(OrderStatus::Confirmed)))
            .await;
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].order_id, alice_orders[0]);

        let page = view
            .query(&OrderQuery::for_customer(alice).page(Some(2), Some(2)))
            .await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].order_id, alice_orders[0]);

        assert_eq!(view.query(&OrderQuery::default()).await.len(), 4);
        assert_eq!(ReadModel::count(&view), 4);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(OrderQuery::default().effective_limit(), 20);
        assert_eq!(OrderQuery::default().page(Some(500), None).effective_limit(), 100);
        assert_eq!(OrderQuery::default().page(Some(0), None).effective_limit(), 1);
    }

    #[tokio::test]
    async fn other_aggregates_only_advance_position() {
        let view = OrderSummaryView::new();
        let event = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Shipment")
            .event_type("Dispatched")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();

        view.handle(&event).await.unwrap();
        assert_eq!(view.position().await.events_seen, 1);
        assert_eq!(ReadModel::count(&view), 0);

        view.reset().await.unwrap();
        assert_eq!(view.position().await, ProjectionPosition::zero());
    }
}
