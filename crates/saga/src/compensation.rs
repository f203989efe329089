//! Compensation of cancelled orders and startup recovery.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use common::{Actor, OrderId, PaymentStatus};
use domain::{Order, OrderStatus};
use event_store::EventStore;
use ledger::{AuditRecord, LedgerError, Payment, Reference};
use serde::Serialize;
use serde_json::json;

use crate::coordinator::OrderSagaCoordinator;
use crate::error::Result;

/// What a [`OrderSagaCoordinator::recover`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub compensations_resumed: usize,
    pub compensations_failed: usize,
    pub commits_resumed: usize,
    pub orphaned_reservations_released: usize,
}

impl<S: EventStore + Clone> OrderSagaCoordinator<S> {
    /// Runs a ledger step, retrying transient failures with linear backoff.
    /// On failure returns the last error and the number of attempts made.
    pub(crate) async fn with_retries<T, F, Fut>(
        &self,
        step: &'static str,
        mut op: F,
    ) -> std::result::Result<T, (LedgerError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ledger::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.compensation_max_attempts => {
                    tracing::warn!(step, attempt, error = %e, "saga step failed, retrying");
                    tokio::time::sleep(self.config.compensation_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    /// Releases a cancelled order's stock and refunds its captured payment.
    ///
    /// Returns false when a step gave up. The failure is recorded on the
    /// order and `recover` picks it up later; the cancellation itself stands.
    pub(crate) async fn compensate(&self, order_id: OrderId, order: &Order) -> bool {
        let started = Instant::now();
        metrics::counter!("saga_compensations_total").increment(1);

        let reference = Reference::for_order(order_id);
        let released = match self
            .with_retries("release_stock", || self.inventory.release(&reference, None))
            .await
        {
            Ok(units) => units,
            Err((e, attempts)) => {
                self.compensation_failed(order_id, "release_stock", &e, attempts).await;
                return false;
            }
        };

        let mut refunded = None;
        if order.payment_status() == PaymentStatus::Completed
            && let Some(payment_id) = order.payment_id()
        {
            match self
                .with_retries("refund_payment", || {
                    self.wallets.refund(payment_id, None, "Order cancelled")
                })
                .await
            {
                Ok(payment) => {
                    refunded = Some(payment.refunded_amount);
                    self.record_audit(
                        AuditRecord::succeeded(
                            Actor::system().id,
                            "payment.refunded",
                            "payment",
                            payment_id,
                        )
                        .with_details(json!({
                            "order_id": order_id,
                            "amount": payment.refunded_amount,
                            "reason": "Order cancelled",
                        })),
                    )
                    .await;
                }
                Err((LedgerError::AlreadyProcessed(_), _)) => {
                    refunded = match self.wallets.payment(payment_id).await {
                        Ok(payment) => payment.map(|p| p.refunded_amount),
                        Err(_) => None,
                    };
                }
                Err((e, attempts)) => {
                    self.compensation_failed(order_id, "refund_payment", &e, attempts).await;
                    return false;
                }
            }
        }

        match self.orders.complete_compensation(order_id, released, refunded).await {
            Ok(_) => {
                metrics::histogram!("saga_duration_seconds", "workflow" => "compensation")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(%order_id, released, ?refunded, "order compensated");
                true
            }
            Err(e) => {
                tracing::error!(%order_id, error = %e, "compensation applied but not recorded");
                false
            }
        }
    }

    /// Refunds a payment captured for an order that could not take it.
    ///
    /// Retried like the other compensation steps. A refund that still fails
    /// is counted and written to the audit log as `compensation.failed`.
    pub(crate) async fn refund_captured(&self, payment: &Payment, reason: &str) -> bool {
        let refunded = self
            .with_retries("refund_payment", || self.wallets.refund(payment.id, None, reason))
            .await;

        match refunded {
            Ok(_) | Err((LedgerError::AlreadyProcessed(_), _)) => {
                tracing::warn!(payment_id = %payment.id, reason, "captured payment refunded");
                self.record_audit(
                    AuditRecord::succeeded(
                        Actor::system().id,
                        "payment.refunded",
                        "payment",
                        payment.id,
                    )
                    .with_details(json!({
                        "order_id": payment.order_id,
                        "amount": payment.amount,
                        "reason": reason,
                    })),
                )
                .await;
                true
            }
            Err((e, attempts)) => {
                metrics::counter!("saga_compensation_failures_total", "step" => "refund_payment")
                    .increment(1);
                tracing::error!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    attempts,
                    error = %e,
                    "refund of captured payment gave up"
                );
                self.record_audit(
                    AuditRecord::failed(
                        Actor::system().id,
                        "compensation.failed",
                        "payment",
                        payment.id,
                        &e,
                    )
                    .with_details(json!({
                        "step": "refund_payment",
                        "order_id": payment.order_id,
                        "amount": payment.amount,
                        "reason": reason,
                        "attempts": attempts,
                    })),
                )
                .await;
                false
            }
        }
    }

    async fn compensation_failed(
        &self,
        order_id: OrderId,
        step: &str,
        error: &LedgerError,
        attempts: u32,
    ) {
        metrics::counter!("saga_compensation_failures_total", "step" => step.to_string())
            .increment(1);
        tracing::error!(%order_id, step, attempts, error = %error, "compensation step gave up");

        if let Err(e) = self
            .orders
            .fail_compensation(order_id, step, &error.to_string(), attempts)
            .await
        {
            tracing::error!(
                %order_id,
                error = %e,
                "compensation failure not recorded on the order"
            );
        }
        self.record_audit(
            AuditRecord::failed(
                Actor::system().id,
                "compensation.failed",
                "order",
                order_id,
                error,
            )
            .with_details(json!({ "step": step, "attempts": attempts })),
        )
        .await;
    }

    /// Finishes work a crash or an outage left behind.
    ///
    /// Cancelled orders whose compensation never completed are compensated
    /// again. Shipped orders whose stock was never committed are committed.
    /// Active reservations older than the grace period whose order was never
    /// persisted are released.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for order_id in self.orders.order_ids().await? {
            let Some(order) = self.orders.get_order(order_id).await? else {
                continue;
            };
            match order.status() {
                OrderStatus::Cancelled if order.compensation().is_outstanding() => {
                    if self.compensate(order_id, &order).await {
                        report.compensations_resumed += 1;
                    } else {
                        report.compensations_failed += 1;
                    }
                }
                OrderStatus::OutForDelivery | OrderStatus::Delivered
                    if !order.reservation_committed() =>
                {
                    if self.commit_order_stock(&Actor::system(), order_id).await {
                        report.commits_resumed += 1;
                    }
                }
                _ => {}
            }
        }

        let grace = chrono::Duration::from_std(self.config.recovery_grace)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = Utc::now() - grace;
        let mut checked = HashSet::new();

        for reservation in self.inventory.active_reservations().await? {
            let Some(order_id) = reservation.reference.order_id() else {
                continue;
            };
            if reservation.created_at > cutoff || !checked.insert(order_id) {
                continue;
            }
            if self.orders.get_order(order_id).await?.is_some() {
                continue;
            }
            let units = self.inventory.release(&reservation.reference, None).await?;
            report.orphaned_reservations_released += 1;
            tracing::warn!(
                reference = %reservation.reference,
                units,
                "released reservation of an order that was never placed"
            );
        }

        tracing::info!(
            resumed = report.compensations_resumed,
            failed = report.compensations_failed,
            commits = report.commits_resumed,
            orphaned = report.orphaned_reservations_released,
            "recovery finished"
        );
        Ok(report)
    }
}
