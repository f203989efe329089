//! Order saga coordinator.
//!
//! The coordinator is the only component that talks to more than one ledger.
//! It orders the steps of each workflow so that a failure at any point leaves
//! the system either fully applied or fully compensated:
//!
//! - create: price, reserve stock, persist the order, notify
//! - confirm (wallet orders): capture payment, then change status
//! - out for delivery: commit the reservation
//! - cancel: change status, then release stock and refund
//!
//! Ledger and notification backends are trait objects, so the binary picks
//! in-memory or Postgres implementations at startup.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    Actor, Money, OrderId, PaymentMethod, PaymentStatus, ProductId, Role, UserId, VariantId,
    WarehouseId,
};
use domain::{
    Action, Address, ChangeStatus, Order, OrderError, OrderItem, OrderNumber, OrderService,
    OrderStatus, PlaceOrder, PricingPolicy, RecordPayment, Resource, policy,
};
use event_store::EventStore;
use ledger::{AuditLog, AuditRecord, InventoryLedger, Payment, Reference, WalletLedger};
use projections::{OrderQuery, OrderSummary, OrderSummaryView, ProjectionProcessor};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::ProductCatalog;
use crate::error::{Result, SagaError};
use crate::notifications::{Notification, NotificationDispatcher, NotificationType};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Attempts per compensation step, including the first.
    pub compensation_max_attempts: u32,
    /// Wait before retry `n` is `compensation_backoff * n`.
    pub compensation_backoff: Duration,
    /// Reservations younger than this are never treated as orphaned.
    pub recovery_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            compensation_max_attempts: 3,
            compensation_backoff: Duration::from_millis(100),
            recovery_grace: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

/// A customer's order request. Prices and warehouses are resolved by the
/// coordinator, never taken from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    pub retailer_id: UserId,
    pub items: Vec<OrderLine>,
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub customer_notes: Option<String>,
}

impl CreateOrder {
    fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        if let Some(line) = self.items.iter().find(|line| line.quantity == 0) {
            return Err(SagaError::validation(format!(
                "Quantity for product {} must be positive",
                line.product_id
            )));
        }
        self.shipping_address.validate()?;
        if let Some(billing) = &self.billing_address {
            billing.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderReceipt {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub status: OrderStatus,
    pub total_amount: Money,
}

pub struct OrderSagaCoordinator<S: EventStore + Clone> {
    pub(crate) orders: OrderService<S>,
    pub(crate) processor: ProjectionProcessor<S>,
    pub(crate) summaries: OrderSummaryView,
    pub(crate) catalog: Arc<dyn ProductCatalog>,
    pub(crate) inventory: Arc<dyn InventoryLedger>,
    pub(crate) wallets: Arc<dyn WalletLedger>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) notifier: Arc<dyn NotificationDispatcher>,
    pub(crate) config: CoordinatorConfig,
}

impl<S: EventStore + Clone> OrderSagaCoordinator<S> {
    pub fn new(
        store: S,
        catalog: Arc<dyn ProductCatalog>,
        inventory: Arc<dyn InventoryLedger>,
        wallets: Arc<dyn WalletLedger>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let summaries = OrderSummaryView::new();
        let mut processor = ProjectionProcessor::new(store.clone());
        processor.register(Box::new(summaries.clone()));

        Self {
            orders: OrderService::new(store),
            processor,
            summaries,
            catalog,
            inventory,
            wallets,
            audit,
            notifier,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.orders = self.orders.with_pricing(pricing);
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryLedger> {
        &self.inventory
    }

    pub fn wallets(&self) -> &Arc<dyn WalletLedger> {
        &self.wallets
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    pub fn order_service(&self) -> &OrderService<S> {
        &self.orders
    }

    /// Places an order for `actor`.
    ///
    /// Every line is priced from the catalog and allocated to warehouses,
    /// most available stock first. All allocations are reserved under the
    /// order's reference before the order is persisted; if any reservation
    /// or the persist fails, everything reserved so far is released.
    #[tracing::instrument(
        skip(self, request),
        fields(customer_id = %actor.id, retailer_id = %request.retailer_id)
    )]
    pub async fn create_order(&self, actor: &Actor, request: CreateOrder) -> Result<OrderReceipt> {
        let started = Instant::now();
        ensure_allowed(
            actor,
            Action::PlaceOrder,
            &Resource::NewOrder,
            "Only customers can place orders",
        )?;
        request.validate()?;

        let items = self.allocate(&request.items).await?;

        let order_id = OrderId::new();
        let reference = Reference::for_order(order_id);
        self.reserve_all(&reference, &items, actor.id).await?;

        let command = PlaceOrder {
            order_id,
            customer_id: actor.id,
            retailer_id: request.retailer_id,
            items,
            shipping_address: request.shipping_address,
            billing_address: request.billing_address,
            payment_method: request.payment_method,
            customer_notes: request.customer_notes,
        };

        let order = match self.orders.place_order(command).await {
            Ok(result) => result.aggregate,
            Err(e) => {
                tracing::error!(
                    %order_id,
                    error = %e,
                    "order could not be persisted, releasing stock"
                );
                self.release_quietly(&reference).await;
                return Err(SagaError::Dependency("Order could not be saved".to_string()));
            }
        };

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("saga_duration_seconds", "workflow" => "create_order")
            .record(started.elapsed().as_secs_f64());

        self.notify(Notification::for_order(
            order.customer_id(),
            NotificationType::OrderPlaced,
            order_id,
            order.order_number(),
        ));
        self.record_audit(
            AuditRecord::succeeded(actor.id, "order.created", "order", order_id).with_details(
                json!({
                    "order_number": order.order_number(),
                    "total_amount": order.total_amount(),
                    "items": order.items().len(),
                }),
            ),
        )
        .await;

        tracing::info!(
            %order_id,
            order_number = %order.order_number(),
            total_amount = %order.total_amount(),
            "order created"
        );

        Ok(OrderReceipt {
            id: order_id,
            order_number: order.order_number().clone(),
            status: order.status(),
            total_amount: order.total_amount(),
        })
    }

    /// Moves an order to `status` and runs the side effects of the target state.
    #[tracing::instrument(skip(self, notes), fields(actor_id = %actor.id, to = %status))]
    pub async fn update_status(
        &self,
        actor: &Actor,
        order_id: OrderId,
        status: OrderStatus,
        notes: Option<String>,
    ) -> Result<Order> {
        let started = Instant::now();
        let order = self.load(order_id).await?;
        ensure_allowed(
            actor,
            Action::UpdateOrderStatus(status),
            &order.as_resource(),
            "Not allowed to update this order",
        )?;
        let from = order.status();
        if !from.can_transition_to(status) {
            return Err(OrderError::InvalidTransition { from, to: status }.into());
        }

        let captured = if status == OrderStatus::Confirmed && needs_capture(&order) {
            Some(self.capture_on_confirm(actor, order_id, &order).await?)
        } else {
            None
        };

        let command = ChangeStatus::new(order_id, *actor, status).with_notes(notes);
        let order = match self.orders.change_status(command).await {
            Ok(result) => result.aggregate,
            Err(e) => {
                if let Some(payment) = captured {
                    self.refund_captured(&payment, "Order confirmation failed").await;
                }
                let err = SagaError::from(e);
                self.record_audit(
                    AuditRecord::failed(actor.id, "order.status_changed", "order", order_id, &err)
                        .with_details(json!({ "from": from, "to": status })),
                )
                .await;
                return Err(err);
            }
        };

        metrics::counter!("order_status_transitions_total", "to" => status.as_str()).increment(1);
        self.record_audit(
            AuditRecord::succeeded(actor.id, "order.status_changed", "order", order_id)
                .with_details(json!({ "from": from, "to": status })),
        )
        .await;

        match status {
            OrderStatus::OutForDelivery => {
                self.commit_order_stock(actor, order_id).await;
            }
            OrderStatus::Cancelled => {
                self.compensate(order_id, &order).await;
            }
            _ => {}
        }

        if let Some(kind) = NotificationType::for_status(status) {
            self.notify(Notification::for_order(
                order.customer_id(),
                kind,
                order_id,
                order.order_number(),
            ));
        }

        metrics::histogram!("saga_duration_seconds", "workflow" => "update_status")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(%order_id, %from, to = %status, "order status changed");

        self.load(order_id).await
    }

    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn get_order(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let order = self.load(order_id).await?;
        ensure_allowed(
            actor,
            Action::ViewOrder,
            &order.as_resource(),
            "Not allowed to view this order",
        )?;
        Ok(order)
    }

    /// Lists orders visible to `actor`, newest first.
    ///
    /// Customers see their own orders and retailers the orders placed with
    /// them. Admins see everything.
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn list_orders(
        &self,
        actor: &Actor,
        status: Option<OrderStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<OrderSummary>> {
        let query = match actor.role {
            Role::Customer => OrderQuery::for_customer(actor.id),
            Role::Retailer => OrderQuery::for_retailer(actor.id),
            Role::Admin => OrderQuery::default(),
            Role::WarehouseManager => {
                return Err(SagaError::forbidden("Not allowed to list orders"));
            }
        }
        .with_status(status)
        .page(limit, offset);

        self.processor.run_catch_up().await?;
        Ok(self.summaries.query(&query).await)
    }

    async fn allocate(&self, lines: &[OrderLine]) -> Result<Vec<OrderItem>> {
        let mut remaining: HashMap<(ProductId, WarehouseId), i64> = HashMap::new();
        let mut warehouses: HashMap<ProductId, Vec<WarehouseId>> = HashMap::new();
        let mut items = Vec::with_capacity(lines.len());

        for line in lines {
            let priced = self.catalog.resolve(line.product_id, line.variant_id).await?;

            if !warehouses.contains_key(&line.product_id) {
                let stock = self.inventory.stock(line.product_id).await?;
                let ids = stock
                    .warehouses
                    .iter()
                    .map(|record| {
                        remaining.insert(
                            (record.product_id, record.warehouse_id),
                            record.available(),
                        );
                        record.warehouse_id
                    })
                    .collect();
                warehouses.insert(line.product_id, ids);
            }

            let mut candidates: Vec<(WarehouseId, i64)> = warehouses
                .get(&line.product_id)
                .into_iter()
                .flatten()
                .map(|id| (*id, remaining.get(&(line.product_id, *id)).copied().unwrap_or(0)))
                .filter(|(_, available)| *available > 0)
                .collect();
            candidates.sort_by_key(|(id, available)| (Reverse(*available), *id));

            let wanted = i64::from(line.quantity);
            let available: i64 = candidates.iter().map(|(_, a)| a).sum();
            if available < wanted {
                return Err(SagaError::InsufficientStock(format!(
                    "Insufficient stock for {}: requested {wanted}, available {available}",
                    priced.product_name
                )));
            }

            let mut left = wanted;
            for (warehouse_id, available) in candidates {
                if left == 0 {
                    break;
                }
                let take = left.min(available);
                left -= take;
                if let Some(slot) = remaining.get_mut(&(line.product_id, warehouse_id)) {
                    *slot -= take;
                }

                let quantity = u32::try_from(take)
                    .map_err(|_| SagaError::validation("Quantity out of range"))?;
                let mut item = OrderItem::new(
                    priced.product_id,
                    warehouse_id,
                    priced.product_name.clone(),
                    quantity,
                    priced.unit_price,
                )
                .with_sku(priced.sku.clone());
                if let Some(variant_id) = priced.variant_id {
                    item = item.with_variant(variant_id, priced.variant_name.clone());
                }
                items.push(item);
            }
        }

        Ok(items)
    }

    async fn reserve_all(
        &self,
        reference: &Reference,
        items: &[OrderItem],
        actor: UserId,
    ) -> Result<()> {
        for item in items {
            if let Err(e) = self
                .inventory
                .reserve(item.product_id, item.warehouse_id, item.quantity, reference, Some(actor))
                .await
            {
                tracing::warn!(
                    %reference,
                    product_id = %item.product_id,
                    error = %e,
                    "reservation failed, rolling back"
                );
                self.release_quietly(reference).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn release_quietly(&self, reference: &Reference) {
        if let Err(e) = self.inventory.release(reference, None).await {
            tracing::error!(
                %reference,
                error = %e,
                "failed to release reservations, left for recovery"
            );
        }
    }

    async fn capture_on_confirm(
        &self,
        actor: &Actor,
        order_id: OrderId,
        order: &Order,
    ) -> Result<Payment> {
        let captured = self
            .wallets
            .capture_payment(
                order_id,
                order.customer_id(),
                order.total_amount(),
                PaymentMethod::Wallet,
            )
            .await
            .map_err(SagaError::from);

        let result = match captured {
            Ok(payment) => {
                let record = RecordPayment::new(order_id, Some(payment.id), payment.status);
                match self.orders.record_payment(record, actor.id).await {
                    Ok(_) => Ok(payment),
                    Err(e) => {
                        self.refund_captured(&payment, "Payment could not be recorded").await;
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                if matches!(e, SagaError::InsufficientFunds(_)) {
                    self.mark_payment_failed(order_id, actor.id).await;
                }
                Err(e)
            }
        };

        self.audit_result(
            actor,
            "payment.processed",
            "order",
            order_id,
            &result,
            json!({ "amount": order.total_amount(), "method": PaymentMethod::Wallet.as_str() }),
        )
        .await;
        result
    }

    /// Consumes the order's reserved stock. Returns false when the commit gave
    /// up; `recover` retries orders that shipped without a commit.
    pub(crate) async fn commit_order_stock(&self, actor: &Actor, order_id: OrderId) -> bool {
        let reference = Reference::for_order(order_id);
        let committed = self
            .with_retries("commit_stock", || self.inventory.commit(&reference, Some(actor.id)))
            .await;

        match committed {
            Ok(units) => {
                let recorded = self.orders.commit_reservation(order_id, actor.id).await;
                if let Err(e) = &recorded {
                    tracing::warn!(
                        %order_id,
                        error = %e,
                        "stock committed but not recorded on the order"
                    );
                }
                self.record_audit(
                    AuditRecord::succeeded(actor.id, "inventory.committed", "order", order_id)
                        .with_details(json!({ "units": units })),
                )
                .await;
                recorded.is_ok()
            }
            Err((e, attempts)) => {
                metrics::counter!("saga_commit_failures_total").increment(1);
                tracing::error!(
                    %order_id,
                    attempts,
                    error = %e,
                    "stock commit failed, left for recovery"
                );
                self.record_audit(
                    AuditRecord::failed(actor.id, "inventory.committed", "order", order_id, &e)
                        .with_details(json!({ "attempts": attempts })),
                )
                .await;
                false
            }
        }
    }

    pub(crate) async fn mark_payment_failed(&self, order_id: OrderId, actor: UserId) {
        let record = RecordPayment::new(order_id, None, PaymentStatus::Failed);
        if let Err(e) = self.orders.record_payment(record, actor).await {
            tracing::warn!(%order_id, error = %e, "failed payment not recorded on the order");
        }
    }

    pub(crate) async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| SagaError::not_found(format!("Order not found: {order_id}")))
    }

    pub(crate) fn notify(&self, notification: Notification) {
        let id = notification.id;
        if let Err(e) = self.notifier.dispatch(notification) {
            tracing::warn!(notification_id = %id, error = %e, "notification not queued");
        }
    }

    /// Audit failures are logged and never fail the audited operation.
    pub(crate) async fn record_audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.record(record).await {
            tracing::error!(error = %e, "failed to write audit record");
        }
    }

    pub(crate) async fn audit_result<T>(
        &self,
        actor: &Actor,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        result: &Result<T>,
        details: serde_json::Value,
    ) {
        let record = match result {
            Ok(_) => AuditRecord::succeeded(actor.id, action, resource_type, resource_id),
            Err(e) => AuditRecord::failed(actor.id, action, resource_type, resource_id, e),
        };
        self.record_audit(record.with_details(details)).await;
    }
}

/// Wallet orders are paid when confirmed unless already paid.
fn needs_capture(order: &Order) -> bool {
    order.payment_method() == PaymentMethod::Wallet
        && matches!(order.payment_status(), PaymentStatus::Pending | PaymentStatus::Failed)
}

pub(crate) fn ensure_allowed(
    actor: &Actor,
    action: Action,
    resource: &Resource,
    message: &str,
) -> Result<()> {
    if policy::allow(actor, action, resource) {
        Ok(())
    } else {
        Err(SagaError::forbidden(message))
    }
}
