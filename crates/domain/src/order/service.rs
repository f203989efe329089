//! Order service providing a simplified API for order operations.

use common::{Actor, AggregateId, Money, UserId};
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{ChangeStatus, Order, PlaceOrder, PricingPolicy, RecordPayment};

/// Service for managing orders.
///
/// Wraps the command handler and the pricing policy applied at placement.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    pricing: PricingPolicy,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a new order service with the given event store and default pricing.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
            pricing: PricingPolicy::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.pricing = pricing;
        self
    }

    /// Sets how many times a command is re-validated after a version conflict.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.handler = self.handler.with_max_attempts(max_attempts);
        self
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Places a new order.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let pricing = self.pricing;
        self.handler
            .execute(cmd.order_id, cmd.customer_id, |order| {
                order.place(&cmd, &pricing)
            })
            .await
    }

    /// Moves an order to a new status on behalf of the command's actor.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, to = %cmd.status))]
    pub async fn change_status(
        &self,
        cmd: ChangeStatus,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, cmd.actor.id, |order| {
                order.change_status(&cmd.actor, cmd.status, cmd.notes.clone())
            })
            .await
    }

    /// Records a payment outcome on an order.
    #[tracing::instrument(skip(self))]
    pub async fn record_payment(
        &self,
        cmd: RecordPayment,
        actor: UserId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, actor, |order| {
                order.record_payment(cmd.payment_id, cmd.status)
            })
            .await
    }

    /// Marks an order's reserved stock as consumed.
    #[tracing::instrument(skip(self))]
    pub async fn commit_reservation(
        &self,
        order_id: AggregateId,
        actor: UserId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, actor, |order| order.commit_reservation())
            .await
    }

    /// Closes the compensation opened by a cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn complete_compensation(
        &self,
        order_id: AggregateId,
        released_quantity: u64,
        refunded_amount: Option<Money>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, Actor::system().id, |order| {
                order.complete_compensation(released_quantity, refunded_amount)
            })
            .await
    }

    /// Records that a compensation step gave up.
    #[tracing::instrument(skip(self))]
    pub async fn fail_compensation(
        &self,
        order_id: AggregateId,
        step: &str,
        error: &str,
        attempts: u32,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, Actor::system().id, |order| {
                order.fail_compensation(step, error, attempts)
            })
            .await
    }

    /// Gets an order by ID, or None if it was never placed.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Lists the ids of every placed order, oldest first.
    pub async fn order_ids(&self) -> Result<Vec<AggregateId>, DomainError> {
        Ok(self
            .handler
            .store()
            .aggregate_ids(Order::aggregate_type())
            .await?)
    }
}
