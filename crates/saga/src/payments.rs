//! Payment capture, confirmation and refund for orders.

use common::{Actor, Money, OrderId, PaymentId, PaymentMethod, PaymentStatus};
use domain::{Action, OrderStatus, RecordPayment};
use event_store::EventStore;
use ledger::Payment;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::coordinator::{OrderSagaCoordinator, ensure_allowed};
use crate::error::{Result, SagaError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    /// Required for mobile money.
    #[serde(default)]
    pub mobile_number: Option<String>,
}

impl PaymentRequest {
    fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(SagaError::validation("Payment amount must be positive"));
        }
        ledger::validate_amount(self.amount)?;
        if self.payment_method == PaymentMethod::MobileMoney
            && self.mobile_number.as_deref().is_none_or(|n| n.trim().is_empty())
        {
            return Err(SagaError::validation(
                "Mobile number is required for mobile money payments",
            ));
        }
        Ok(())
    }
}

impl<S: EventStore + Clone> OrderSagaCoordinator<S> {
    /// Pays for an order.
    ///
    /// Wallet payments debit the customer and complete at once. Other methods
    /// stay `processing` until [`confirm_payment`](Self::confirm_payment).
    #[tracing::instrument(
        skip(self, request),
        fields(actor_id = %actor.id, order_id = %request.order_id, method = %request.payment_method)
    )]
    pub async fn process_payment(&self, actor: &Actor, request: PaymentRequest) -> Result<Payment> {
        request.validate()?;
        let order_id = request.order_id;
        let order = self.load(order_id).await?;
        ensure_allowed(
            actor,
            Action::PayOrder,
            &order.as_resource(),
            "Not allowed to pay for this order",
        )?;

        if order.status() == OrderStatus::Cancelled {
            return Err(SagaError::InvalidTransition(
                "Cannot pay for a cancelled order".to_string(),
            ));
        }
        let current = order.payment_status();
        if current.is_settled() || current == PaymentStatus::Processing {
            return Err(SagaError::AlreadyProcessed(format!("Order payment is already {current}")));
        }
        if request.amount != order.total_amount() {
            return Err(SagaError::validation(format!(
                "Payment amount {} does not match order total {}",
                request.amount,
                order.total_amount()
            )));
        }

        let captured = self
            .wallets
            .capture_payment(order_id, order.customer_id(), request.amount, request.payment_method)
            .await
            .map_err(SagaError::from);

        let result = match captured {
            Ok(payment) => {
                let record = RecordPayment::new(order_id, Some(payment.id), payment.status);
                match self.orders.record_payment(record, actor.id).await {
                    Ok(_) => Ok(payment),
                    Err(e) => {
                        if payment.status == PaymentStatus::Completed {
                            self.refund_captured(&payment, "Payment could not be recorded").await;
                        }
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
            json!({ "amount": request.amount, "method": request.payment_method }),
        )
        .await;

        if let Ok(payment) = &result {
            metrics::counter!(
                "payments_processed_total",
                "method" => request.payment_method.as_str()
            )
                .increment(1);
            tracing::info!(payment_id = %payment.id, status = %payment.status, "payment processed");
        }
        result
    }

    /// Applies the payment rail's verdict to a processing payment.
    ///
    /// A successful verdict for an order that was cancelled meanwhile is
    /// declined so the cancelled order never becomes paid. If the order is
    /// cancelled after the verdict is applied, the completed payment is
    /// refunded.
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        payment_id: PaymentId,
        success: bool,
    ) -> Result<Payment> {
        let payment = self.find_payment(payment_id).await?;
        let order = self.load(payment.order_id).await?;
        ensure_allowed(
            actor,
            Action::ConfirmPayment,
            &order.payment_resource(),
            "Only admins can confirm payments",
        )?;

        let cancelled = order.status() == OrderStatus::Cancelled;
        if success && cancelled {
            tracing::warn!(
                %payment_id,
                order_id = %payment.order_id,
                "declining payment for a cancelled order"
            );
        }
        let success = success && !cancelled;

        let result: Result<Payment> = async {
            let payment = self.wallets.complete_payment(payment_id, success).await?;
            let record = RecordPayment::new(payment.order_id, Some(payment.id), payment.status);
            if let Err(e) = self.orders.record_payment(record, actor.id).await {
                if payment.status == PaymentStatus::Completed {
                    self.refund_captured(&payment, "Order changed before payment was recorded")
                        .await;
                }
                return Err(e.into());
            }
            Ok(payment)
        }
        .await;

        self.audit_result(
            actor,
            "payment.confirmed",
            "payment",
            payment_id,
            &result,
            json!({ "order_id": payment.order_id, "success": success }),
        )
        .await;
        result
    }

    /// Refunds a settled payment, in full when `amount` is `None`.
    #[tracing::instrument(skip(self, reason), fields(actor_id = %actor.id))]
    pub async fn refund_payment(
        &self,
        actor: &Actor,
        payment_id: PaymentId,
        amount: Option<Money>,
        reason: &str,
    ) -> Result<Payment> {
        if reason.trim().is_empty() {
            return Err(SagaError::validation("Refund reason is required"));
        }
        if let Some(amount) = amount {
            if !amount.is_positive() {
                return Err(SagaError::validation("Refund amount must be positive"));
            }
            ledger::validate_amount(amount)?;
        }

        let payment = self.find_payment(payment_id).await?;
        let order = self.load(payment.order_id).await?;
        ensure_allowed(
            actor,
            Action::RefundPayment,
            &order.payment_resource(),
            "Not allowed to refund this payment",
        )?;

        let result: Result<Payment> = async {
            let refunded = self.wallets.refund(payment_id, amount, reason).await?;
            let record = RecordPayment::new(
                refunded.order_id,
                Some(refunded.id),
                PaymentStatus::Refunded,
            );
            self.orders.record_payment(record, actor.id).await?;
            Ok(refunded)
        }
        .await;

        self.audit_result(
            actor,
            "payment.refunded",
            "payment",
            payment_id,
            &result,
            json!({ "order_id": payment.order_id, "amount": amount, "reason": reason }),
        )
        .await;
        result
    }

    pub async fn get_payment(&self, actor: &Actor, payment_id: PaymentId) -> Result<Payment> {
        let payment = self.find_payment(payment_id).await?;
        let order = self.load(payment.order_id).await?;
        ensure_allowed(
            actor,
            Action::ViewOrder,
            &order.as_resource(),
            "Not allowed to view this payment",
        )?;
        Ok(payment)
    }

    async fn find_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.wallets
            .payment(payment_id)
            .await?
            .ok_or_else(|| SagaError::not_found(format!("Payment not found: {payment_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: PaymentMethod, mobile_number: Option<&str>) -> PaymentRequest {
        PaymentRequest {
            order_id: OrderId::new(),
            amount: Money::from_major(100),
            payment_method: method,
            mobile_number: mobile_number.map(str::to_string),
        }
    }

    #[test]
    fn mobile_money_needs_a_number() {
        assert!(request(PaymentMethod::MobileMoney, None).validate().is_err());
        assert!(request(PaymentMethod::MobileMoney, Some("  ")).validate().is_err());
        assert!(request(PaymentMethod::MobileMoney, Some("+254700000001")).validate().is_ok());
        assert!(request(PaymentMethod::Wallet, None).validate().is_ok());
    }

    #[test]
    fn amount_must_be_positive() {
        let mut req = request(PaymentMethod::Wallet, None);
        req.amount = Money::ZERO;
        assert!(matches!(req.validate(), Err(SagaError::Validation(_))));
    }

    #[test]
    fn amount_must_be_whole_cents() {
        let mut req = request(PaymentMethod::Wallet, None);
        req.amount = "257.001".parse().unwrap();
        assert!(matches!(req.validate(), Err(SagaError::Validation(_))));
    }
}
