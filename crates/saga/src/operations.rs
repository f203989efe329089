//! Direct inventory, wallet and event operations.
//!
//! These bypass the order workflow but share its authorization and audit
//! trail. Order-owned reservations can only be touched through the order.

use common::{Actor, Money, OrderId, ProductId, UserId, WarehouseId};
use domain::{Action, Resource};
use event_store::EventStore;
use ledger::{
    Adjustment, InventoryRecord, MovementType, Reference, Reservation, StockAlert, StockLevel,
    StockMovement, Transfer, Wallet, WalletTransaction,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::coordinator::{OrderSagaCoordinator, ensure_allowed};
use crate::error::{Result, SagaError};
use crate::notifications::{Notification, NotificationType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Signed change to on-hand stock.
    pub delta: i64,
    pub reason: MovementType,
    #[serde(default)]
    pub notes: Option<String>,
}

fn manual_reference(reference: &Reference) -> Result<()> {
    if reference.as_str().trim().is_empty() {
        return Err(SagaError::validation("Reference is required"));
    }
    if reference.order_id().is_some() {
        return Err(SagaError::validation(
            "Order reservations are managed through the order",
        ));
    }
    Ok(())
}

impl<S: EventStore + Clone> OrderSagaCoordinator<S> {
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn reserve_stock(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: u32,
        reference: Reference,
    ) -> Result<Reservation> {
        let result: Result<Reservation> = async {
            ensure_allowed(
                actor,
                Action::ReserveStock,
                &Resource::Inventory,
                "Not allowed to reserve stock",
            )?;
            manual_reference(&reference)?;
            if quantity == 0 {
                return Err(SagaError::validation("Quantity must be positive"));
            }
            Ok(self
                .inventory
                .reserve(product_id, warehouse_id, quantity, &reference, Some(actor.id))
                .await?)
        }
        .await;

        self.audit_result(
            actor,
            "inventory.reserved",
            "inventory",
            &reference,
            &result,
            json!({ "product_id": product_id, "warehouse_id": warehouse_id, "quantity": quantity }),
        )
        .await;
        result
    }

    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn release_stock(&self, actor: &Actor, reference: Reference) -> Result<u64> {
        let result: Result<u64> = async {
            ensure_allowed(
                actor,
                Action::ReleaseStock,
                &Resource::Inventory,
                "Not allowed to release stock",
            )?;
            manual_reference(&reference)?;
            Ok(self.inventory.release(&reference, Some(actor.id)).await?)
        }
        .await;

        self.audit_result(actor, "inventory.released", "inventory", &reference, &result, json!({}))
            .await;
        result
    }

    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn commit_stock(&self, actor: &Actor, reference: Reference) -> Result<u64> {
        let result: Result<u64> = async {
            ensure_allowed(
                actor,
                Action::CommitStock,
                &Resource::Inventory,
                "Not allowed to commit stock",
            )?;
            manual_reference(&reference)?;
            Ok(self.inventory.commit(&reference, Some(actor.id)).await?)
        }
        .await;

        self.audit_result(actor, "inventory.committed", "inventory", &reference, &result, json!({}))
            .await;
        result
    }

    #[tracing::instrument(skip(self, notes), fields(actor_id = %actor.id))]
    pub async fn transfer_stock(
        &self,
        actor: &Actor,
        product_id: ProductId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: u32,
        notes: Option<String>,
    ) -> Result<(InventoryRecord, InventoryRecord)> {
        let result: Result<(InventoryRecord, InventoryRecord)> = async {
            ensure_allowed(
                actor,
                Action::TransferStock,
                &Resource::Inventory,
                "Not allowed to transfer stock",
            )?;
            Ok(self
                .inventory
                .transfer(Transfer {
                    product_id,
                    from,
                    to,
                    quantity,
                    performed_by: Some(actor.id),
                    notes,
                })
                .await?)
        }
        .await;

        self.audit_result(
            actor,
            "inventory.transferred",
            "product",
            product_id,
            &result,
            json!({ "from": from, "to": to, "quantity": quantity }),
        )
        .await;
        result
    }

    #[tracing::instrument(
        skip(self, adjustment),
        fields(actor_id = %actor.id, product_id = %adjustment.product_id)
    )]
    pub async fn adjust_stock(
        &self,
        actor: &Actor,
        adjustment: StockAdjustment,
    ) -> Result<InventoryRecord> {
        let details = json!({
            "warehouse_id": adjustment.warehouse_id,
            "delta": adjustment.delta,
            "reason": adjustment.reason,
        });
        let product_id = adjustment.product_id;

        let result: Result<InventoryRecord> = async {
            ensure_allowed(
                actor,
                Action::AdjustStock,
                &Resource::Inventory,
                "Not allowed to adjust stock",
            )?;
            let mut change = Adjustment::new(
                adjustment.product_id,
                adjustment.warehouse_id,
                adjustment.delta,
                adjustment.reason,
            )
            .by(actor.id);
            if let Some(notes) = adjustment.notes {
                change = change.notes(notes);
            }
            Ok(self.inventory.adjust(change).await?)
        }
        .await;

        self.audit_result(actor, "inventory.adjusted", "product", product_id, &result, details)
            .await;
        result
    }

    pub async fn stock_level(&self, actor: &Actor, product_id: ProductId) -> Result<StockLevel> {
        ensure_allowed(
            actor,
            Action::ViewStock,
            &Resource::Inventory,
            "Not allowed to view stock",
        )?;
        Ok(self.inventory.stock(product_id).await?)
    }

    pub async fn stock_movements(
        &self,
        actor: &Actor,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<StockMovement>> {
        ensure_allowed(
            actor,
            Action::ViewStock,
            &Resource::Inventory,
            "Not allowed to view stock",
        )?;
        Ok(self.inventory.movements(product_id, limit).await?)
    }

    pub async fn stock_alerts(
        &self,
        actor: &Actor,
        include_acknowledged: bool,
    ) -> Result<Vec<StockAlert>> {
        ensure_allowed(
            actor,
            Action::ManageStockAlerts,
            &Resource::Inventory,
            "Not allowed to view stock alerts",
        )?;
        Ok(self.inventory.alerts(include_acknowledged).await?)
    }

    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn acknowledge_alert(&self, actor: &Actor, alert_id: Uuid) -> Result<StockAlert> {
        let result: Result<StockAlert> = async {
            ensure_allowed(
                actor,
                Action::ManageStockAlerts,
                &Resource::Inventory,
                "Not allowed to manage stock alerts",
            )?;
            Ok(self.inventory.acknowledge_alert(alert_id, actor.id).await?)
        }
        .await;

        self.audit_result(actor, "alert.acknowledged", "stock_alert", alert_id, &result, json!({}))
            .await;
        result
    }

    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn configure_thresholds(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        low_stock_threshold: i64,
        max_stock_level: Option<i64>,
    ) -> Result<InventoryRecord> {
        let result: Result<InventoryRecord> = async {
            ensure_allowed(
                actor,
                Action::ManageStockAlerts,
                &Resource::Inventory,
                "Not allowed to configure stock alerts",
            )?;
            Ok(self
                .inventory
                .configure_thresholds(
                    product_id,
                    warehouse_id,
                    low_stock_threshold,
                    max_stock_level,
                )
                .await?)
        }
        .await;

        self.audit_result(
            actor,
            "inventory.thresholds_configured",
            "product",
            product_id,
            &result,
            json!({
                "warehouse_id": warehouse_id,
                "low_stock_threshold": low_stock_threshold,
                "max_stock_level": max_stock_level,
            }),
        )
        .await;
        result
    }

    pub async fn wallet(&self, actor: &Actor) -> Result<Wallet> {
        ensure_allowed(
            actor,
            Action::ViewWallet,
            &Resource::Wallet { owner_id: actor.id },
            "Not allowed to view this wallet",
        )?;
        Ok(self.wallets.get_balance(actor.id).await?)
    }

    pub async fn wallet_transactions(
        &self,
        actor: &Actor,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>> {
        ensure_allowed(
            actor,
            Action::ViewWallet,
            &Resource::Wallet { owner_id: actor.id },
            "Not allowed to view this wallet",
        )?;
        Ok(self.wallets.transactions(actor.id, limit).await?)
    }

    /// Credits the caller's wallet within their KYC tier's daily deposit limit.
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn top_up(
        &self,
        actor: &Actor,
        amount: Money,
        reference: Option<String>,
    ) -> Result<WalletTransaction> {
        let result: Result<WalletTransaction> = async {
            ensure_allowed(
                actor,
                Action::TopUpWallet,
                &Resource::Wallet { owner_id: actor.id },
                "Not allowed to top up this wallet",
            )?;
            Ok(self
                .wallets
                .deposit(actor.id, amount, actor.kyc_level, reference.clone())
                .await?)
        }
        .await;

        self.audit_result(
            actor,
            "wallet.topped_up",
            "wallet",
            actor.id,
            &result,
            json!({ "amount": amount, "reference": reference }),
        )
        .await;
        result
    }

    /// Moves funds from the caller to `recipient`. Returns (sender entry, recipient entry).
    #[tracing::instrument(skip(self, description), fields(actor_id = %actor.id))]
    pub async fn transfer_funds(
        &self,
        actor: &Actor,
        recipient: UserId,
        amount: Money,
        description: Option<String>,
    ) -> Result<(WalletTransaction, WalletTransaction)> {
        let result: Result<(WalletTransaction, WalletTransaction)> = async {
            ensure_allowed(
                actor,
                Action::TransferFunds,
                &Resource::Wallet { owner_id: actor.id },
                "Not allowed to transfer from this wallet",
            )?;
            Ok(self
                .wallets
                .transfer(actor.id, recipient, amount, actor.kyc_level, description)
                .await?)
        }
        .await;

        self.audit_result(
            actor,
            "wallet.transferred",
            "wallet",
            actor.id,
            &result,
            json!({ "recipient": recipient, "amount": amount }),
        )
        .await;
        result
    }

    /// Sends an order notification to the order's customer on an admin's request.
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn publish_order_event(
        &self,
        actor: &Actor,
        order_id: OrderId,
        event_type: NotificationType,
    ) -> Result<Notification> {
        require_admin(actor)?;
        if event_type.is_delivery_event() {
            return Err(SagaError::validation(format!("{event_type} is not an order event")));
        }
        let order = self.load(order_id).await?;
        let notification = Notification::for_order(
            order.customer_id(),
            event_type,
            order_id,
            order.order_number(),
        );
        self.notify(notification.clone());
        Ok(notification)
    }

    /// Sends a delivery notification to `customer_id` on an admin's request.
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn publish_delivery_event(
        &self,
        actor: &Actor,
        customer_id: UserId,
        event_type: NotificationType,
        delivery_id: Option<String>,
    ) -> Result<Notification> {
        require_admin(actor)?;
        if !event_type.is_delivery_event() {
            return Err(SagaError::validation(format!("{event_type} is not a delivery event")));
        }
        let notification = Notification::for_delivery(customer_id, event_type, delivery_id);
        self.notify(notification.clone());
        Ok(notification)
    }
}

fn require_admin(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(SagaError::forbidden("Only admins can publish events"))
    }
}
