use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ProductId, UserId, WarehouseId};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Adjustment, InventoryLedger, InventoryRecord, MovementType, Reservation, ReservationStatus,
    StockAlert, StockDirection, StockLevel, StockMovement, Transfer, evaluate_alerts,
    record_reservation_outcome, validate_quantity, validate_thresholds,
};
use crate::{LedgerError, Reference, Result};

type Key = (ProductId, WarehouseId);

#[derive(Default)]
struct State {
    records: HashMap<Key, InventoryRecord>,
    reservations: Vec<Reservation>,
    movements: Vec<StockMovement>,
    alerts: Vec<StockAlert>,
}

struct MovementEntry<'a> {
    movement_type: MovementType,
    direction: StockDirection,
    quantity: i64,
    before: i64,
    after: i64,
    reference: Option<&'a str>,
    performed_by: Option<UserId>,
    notes: Option<String>,
}

impl State {
    fn record_mut(&mut self, key: Key) -> Result<&mut InventoryRecord> {
        self.records
            .get_mut(&key)
            .ok_or_else(|| {
                LedgerError::not_found("inventory record", format!("{}/{}", key.0, key.1))
            })
    }

    fn push_movement(&mut self, key: Key, entry: MovementEntry<'_>) {
        self.movements.push(StockMovement {
            id: Uuid::new_v4(),
            product_id: key.0,
            warehouse_id: key.1,
            movement_type: entry.movement_type,
            direction: entry.direction,
            quantity: entry.quantity,
            quantity_before: entry.before,
            quantity_after: entry.after,
            reference: entry.reference.map(str::to_string),
            performed_by: entry.performed_by,
            notes: entry.notes,
            created_at: Utc::now(),
        });
    }

    /// Raises alerts the record needs, skipping types that already have an
    /// unacknowledged alert.
    fn evaluate(&mut self, key: Key) {
        let Some(record) = self.records.get(&key) else {
            return;
        };
        for alert_type in evaluate_alerts(record) {
            let open = self.alerts.iter().any(|a| {
                !a.acknowledged
                    && a.product_id == key.0
                    && a.warehouse_id == key.1
                    && a.alert_type == alert_type
            });
            if !open {
                tracing::info!(
                    product_id = %key.0,
                    warehouse_id = %key.1,
                    %alert_type,
                    on_hand = record.on_hand,
                    "stock alert raised"
                );
                self.alerts.push(StockAlert::new(record, alert_type));
            }
        }
    }

    /// Closes every active reservation under `reference` with `status`,
    /// returning (key, quantity) per closed reservation.
    fn close_reservations(
        &mut self,
        reference: &Reference,
        status: ReservationStatus,
    ) -> Vec<(Key, i64)> {
        let now = Utc::now();
        self.reservations
            .iter_mut()
            .filter(|r| r.reference == *reference && r.status == ReservationStatus::Active)
            .map(|r| {
                r.status = status;
                r.closed_at = Some(now);
                ((r.product_id, r.warehouse_id), r.quantity)
            })
            .collect()
    }
}

/// In-memory inventory ledger.
///
/// One mutex guards the whole ledger and is held for the full operation, so
/// the availability check and the update can never interleave.
#[derive(Clone, Default)]
pub struct InMemoryInventoryLedger {
    state: Arc<Mutex<State>>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn reserve(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: u32,
        reference: &Reference,
        performed_by: Option<UserId>,
    ) -> Result<Reservation> {
        validate_quantity(quantity)?;
        let quantity = i64::from(quantity);
        let key = (product_id, warehouse_id);

        let mut state = self.state.lock().await;
        let record = state.record_mut(key)?;
        if record.available() < quantity {
            let available = record.available();
            record_reservation_outcome("insufficient");
            return Err(LedgerError::InsufficientStock {
                product_id,
                warehouse_id,
                requested: quantity,
                available,
            });
        }

        let before = record.reserved;
        record.reserved += quantity;
        record.updated_at = Utc::now();
        let after = record.reserved;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            reference: reference.clone(),
            product_id,
            warehouse_id,
            quantity,
            status: ReservationStatus::Active,
            created_at: Utc::now(),
            closed_at: None,
        };
        state.reservations.push(reservation.clone());
        state.push_movement(
            key,
            MovementEntry {
                movement_type: MovementType::Reserved,
                direction: StockDirection::Out,
                quantity,
                before,
                after,
                reference: Some(reference.as_str()),
                performed_by,
                notes: None,
            },
        );
        state.evaluate(key);
        record_reservation_outcome("reserved");

        Ok(reservation)
    }

    async fn release(&self, reference: &Reference, performed_by: Option<UserId>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let closed = state.close_reservations(reference, ReservationStatus::Released);

        let mut released = 0u64;
        for (key, quantity) in closed {
            let record = state.record_mut(key)?;
            let before = record.reserved;
            record.reserved -= quantity;
            record.updated_at = Utc::now();
            let after = record.reserved;
            state.push_movement(
                key,
                MovementEntry {
                    movement_type: MovementType::Released,
                    direction: StockDirection::In,
                    quantity,
                    before,
                    after,
                    reference: Some(reference.as_str()),
                    performed_by,
                    notes: None,
                },
            );
            state.evaluate(key);
            released += quantity.unsigned_abs();
        }

        if released > 0 {
            record_reservation_outcome("released");
        }
        Ok(released)
    }

    async fn commit(&self, reference: &Reference, performed_by: Option<UserId>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let closed = state.close_reservations(reference, ReservationStatus::Committed);

        let mut committed = 0u64;
        for (key, quantity) in closed {
            let record = state.record_mut(key)?;
            let before = record.on_hand;
            record.on_hand -= quantity;
            record.reserved -= quantity;
            record.updated_at = Utc::now();
            let after = record.on_hand;
            state.push_movement(
                key,
                MovementEntry {
                    movement_type: MovementType::Sold,
                    direction: StockDirection::Out,
                    quantity,
                    before,
                    after,
                    reference: Some(reference.as_str()),
                    performed_by,
                    notes: None,
                },
            );
            state.evaluate(key);
            committed += quantity.unsigned_abs();
        }

        if committed > 0 {
            record_reservation_outcome("committed");
        }
        Ok(committed)
    }

    async fn transfer(&self, transfer: Transfer) -> Result<(InventoryRecord, InventoryRecord)> {
        transfer.validate()?;
        let quantity = i64::from(transfer.quantity);
        let from = (transfer.product_id, transfer.from);
        let to = (transfer.product_id, transfer.to);

        let mut state = self.state.lock().await;
        let source = state.record_mut(from)?;
        if source.available() < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: transfer.product_id,
                warehouse_id: transfer.from,
                requested: quantity,
                available: source.available(),
            });
        }

        let source_before = source.on_hand;
        source.on_hand -= quantity;
        source.updated_at = Utc::now();
        let source_after = source.on_hand;

        let destination = state
            .records
            .entry(to)
            .or_insert_with(|| InventoryRecord::new(to.0, to.1));
        let destination_before = destination.on_hand;
        destination.on_hand += quantity;
        destination.updated_at = Utc::now();
        let destination_after = destination.on_hand;

        let reference = format!("transfer:{}->{}", transfer.from, transfer.to);
        state.push_movement(
            from,
            MovementEntry {
                movement_type: MovementType::Transfer,
                direction: StockDirection::Out,
                quantity,
                before: source_before,
                after: source_after,
                reference: Some(&reference),
                performed_by: transfer.performed_by,
                notes: transfer.notes.clone(),
            },
        );
        state.push_movement(
            to,
            MovementEntry {
                movement_type: MovementType::Transfer,
                direction: StockDirection::In,
                quantity,
                before: destination_before,
                after: destination_after,
                reference: Some(&reference),
                performed_by: transfer.performed_by,
                notes: transfer.notes,
            },
        );
        state.evaluate(from);
        state.evaluate(to);

        let source = state.record_mut(from)?.clone();
        let destination = state.record_mut(to)?.clone();
        Ok((source, destination))
    }

    async fn adjust(&self, adjustment: Adjustment) -> Result<InventoryRecord> {
        let key = (adjustment.product_id, adjustment.warehouse_id);

        let mut state = self.state.lock().await;
        let existing = state.records.get(&key).cloned();
        let current = existing.unwrap_or_else(|| InventoryRecord::new(key.0, key.1));
        let after = adjustment.validate(&current)?;

        let record = state.records.entry(key).or_insert(current);
        let before = record.on_hand;
        record.on_hand = after;
        record.updated_at = Utc::now();
        let updated = record.clone();

        state.push_movement(
            key,
            MovementEntry {
                movement_type: adjustment.reason,
                direction: adjustment.direction(),
                quantity: adjustment.delta.abs(),
                before,
                after,
                reference: None,
                performed_by: adjustment.performed_by,
                notes: adjustment.notes,
            },
        );
        state.evaluate(key);

        Ok(updated)
    }

    async fn stock(&self, product_id: ProductId) -> Result<StockLevel> {
        let state = self.state.lock().await;
        let records = state
            .records
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect();
        Ok(StockLevel::from_records(product_id, records))
    }

    async fn record(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&(product_id, warehouse_id)).cloned())
    }

    async fn movements(&self, product_id: ProductId, limit: usize) -> Result<Vec<StockMovement>> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| m.product_id == product_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn alerts(&self, include_acknowledged: bool) -> Result<Vec<StockAlert>> {
        let state = self.state.lock().await;
        Ok(state
            .alerts
            .iter()
            .filter(|a| include_acknowledged || !a.acknowledged)
            .cloned()
            .collect())
    }

    async fn acknowledge_alert(&self, alert_id: Uuid, user: UserId) -> Result<StockAlert> {
        let mut state = self.state.lock().await;
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| LedgerError::not_found("stock alert", alert_id))?;

        if alert.acknowledged {
            return Err(LedgerError::AlreadyProcessed(format!(
                "alert {alert_id} is already acknowledged"
            )));
        }
        alert.acknowledged = true;
        alert.acknowledged_by = Some(user);
        alert.acknowledged_at = Some(Utc::now());
        Ok(alert.clone())
    }

    async fn configure_thresholds(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        low_stock_threshold: i64,
        max_stock_level: Option<i64>,
    ) -> Result<InventoryRecord> {
        validate_thresholds(low_stock_threshold, max_stock_level)?;
        let key = (product_id, warehouse_id);

        let mut state = self.state.lock().await;
        let record = state.record_mut(key)?;
        record.low_stock_threshold = low_stock_threshold;
        record.max_stock_level = max_stock_level;
        record.updated_at = Utc::now();
        let updated = record.clone();
        state.evaluate(key);

        Ok(updated)
    }

    async fn active_reservations(&self) -> Result<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Active)
            .cloned()
            .collect())
    }
}
