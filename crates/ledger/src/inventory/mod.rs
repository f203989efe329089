//! Per (product, warehouse) stock ledger.
//!
//! Every record keeps `0 <= reserved <= on_hand`. Reservations are claims
//! grouped by a [`Reference`]; release and commit act on the whole group and
//! are idempotent. Every mutation appends a [`StockMovement`] and re-evaluates
//! stock alerts for the rows it touched.

mod memory;
mod postgres;

pub use memory::InMemoryInventoryLedger;
pub use postgres::PostgresInventoryLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProductId, UserId, WarehouseId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LedgerError, Reference, Result};

/// Threshold applied to records created without an explicit one.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

wire_enum!(
    /// Why stock moved.
    MovementType, "movement type" {
        Received => "received",
        Sold => "sold",
        Returned => "returned",
        Damaged => "damaged",
        Adjustment => "adjustment",
        Transfer => "transfer",
        Reserved => "reserved",
        Released => "released",
    }
);

wire_enum!(
    StockDirection, "stock direction" {
        In => "in",
        Out => "out",
    }
);

wire_enum!(
    AlertType, "alert type" {
        LowStock => "low_stock",
        OutOfStock => "out_of_stock",
        Overstock => "overstock",
    }
);

wire_enum!(
    ReservationStatus, "reservation status" {
        Active => "active",
        Released => "released",
        Committed => "committed",
    }
);

/// Stock of one product in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub on_hand: i64,
    pub reserved: i64,
    pub low_stock_threshold: i64,
    pub max_stock_level: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
            on_hand: 0,
            reserved: 0,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            max_stock_level: None,
            updated_at: Utc::now(),
        }
    }

    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

/// Stock of one product summed over every warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    pub warehouses: Vec<InventoryRecord>,
}

impl StockLevel {
    pub fn from_records(product_id: ProductId, mut warehouses: Vec<InventoryRecord>) -> Self {
        warehouses.sort_by_key(|r| std::cmp::Reverse(r.available()));
        Self {
            product_id,
            on_hand: warehouses.iter().map(|r| r.on_hand).sum(),
            reserved: warehouses.iter().map(|r| r.reserved).sum(),
            available: warehouses.iter().map(InventoryRecord::available).sum(),
            warehouses,
        }
    }
}

/// Append-only record of one stock mutation.
///
/// For `reserved` and `released` movements the before/after quantities track
/// the reserved count; for every other type they track on-hand stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub direction: StockDirection,
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reference: Option<String>,
    pub performed_by: Option<UserId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: Uuid,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub alert_type: AlertType,
    /// On-hand quantity when the alert was raised.
    pub quantity: i64,
    pub acknowledged: bool,
    pub acknowledged_by: Option<UserId>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StockAlert {
    pub fn new(record: &InventoryRecord, alert_type: AlertType) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: record.product_id,
            warehouse_id: record.warehouse_id,
            alert_type,
            quantity: record.on_hand,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }
}

/// A claim on stock in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub reference: Reference,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// A direct change to on-hand stock.
#[derive(Debug, Clone)]
pub struct Adjustment {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Signed change to on-hand stock.
    pub delta: i64,
    /// One of `received`, `returned`, `damaged` or `adjustment`.
    pub reason: MovementType,
    pub performed_by: Option<UserId>,
    pub notes: Option<String>,
}

impl Adjustment {
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        delta: i64,
        reason: MovementType,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            delta,
            reason,
            performed_by: None,
            notes: None,
        }
    }

    pub fn by(mut self, user: UserId) -> Self {
        self.performed_by = Some(user);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Checks the request itself and the resulting on-hand against `record`.
    pub(crate) fn validate(&self, record: &InventoryRecord) -> Result<i64> {
        if self.delta == 0 {
            return Err(LedgerError::validation("adjustment delta must not be zero"));
        }
        if !matches!(
            self.reason,
            MovementType::Received
                | MovementType::Returned
                | MovementType::Damaged
                | MovementType::Adjustment
        ) {
            return Err(LedgerError::validation(format!(
                "{} is not an adjustment reason",
                self.reason
            )));
        }
        let after = record.on_hand + self.delta;
        if after < 0 {
            return Err(LedgerError::validation(format!(
                "adjustment would leave {after} on hand"
            )));
        }
        if after < record.reserved {
            return Err(LedgerError::validation(format!(
                "adjustment would leave {after} on hand with {} reserved",
                record.reserved
            )));
        }
        Ok(after)
    }

    pub(crate) fn direction(&self) -> StockDirection {
        if self.delta > 0 {
            StockDirection::In
        } else {
            StockDirection::Out
        }
    }
}

/// A move of stock between two warehouses.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub product_id: ProductId,
    pub from: WarehouseId,
    pub to: WarehouseId,
    pub quantity: u32,
    pub performed_by: Option<UserId>,
    pub notes: Option<String>,
}

impl Transfer {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.from == self.to {
            return Err(LedgerError::validation(
                "source and destination warehouse must differ",
            ));
        }
        validate_quantity(self.quantity)
    }
}

pub(crate) fn validate_quantity(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(LedgerError::validation("quantity must be positive"));
    }
    Ok(())
}

pub(crate) fn validate_thresholds(low: i64, max: Option<i64>) -> Result<()> {
    if low < 0 {
        return Err(LedgerError::validation("low stock threshold must not be negative"));
    }
    if let Some(max) = max
        && max <= low
    {
        return Err(LedgerError::validation(
            "max stock level must be above the low stock threshold",
        ));
    }
    Ok(())
}

/// Alerts a record should carry given its current stock.
pub fn evaluate_alerts(record: &InventoryRecord) -> Vec<AlertType> {
    let mut alerts = Vec::new();
    if record.on_hand == 0 {
        alerts.push(AlertType::OutOfStock);
    } else if record.on_hand <= record.low_stock_threshold {
        alerts.push(AlertType::LowStock);
    }
    if let Some(max) = record.max_stock_level
        && record.on_hand > max
    {
        alerts.push(AlertType::Overstock);
    }
    alerts
}

pub(crate) fn record_reservation_outcome(outcome: &'static str) {
    metrics::counter!("inventory_reservations_total", "outcome" => outcome).increment(1);
}

/// Stock ledger keyed by (product, warehouse).
///
/// Each operation is atomic: it either applies fully, with its movements and
/// alerts, or not at all.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Claims `quantity` units, failing with `InsufficientStock` if fewer are available.
    async fn reserve(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: u32,
        reference: &Reference,
        performed_by: Option<UserId>,
    ) -> Result<Reservation>;

    /// Releases every active reservation under `reference`. Returns the units
    /// released; zero means there was nothing left to release.
    async fn release(&self, reference: &Reference, performed_by: Option<UserId>) -> Result<u64>;

    /// Turns every active reservation under `reference` into consumed stock.
    /// Returns the units committed; zero means already committed or released.
    async fn commit(&self, reference: &Reference, performed_by: Option<UserId>) -> Result<u64>;

    /// Moves available stock between warehouses. Returns (source, destination).
    async fn transfer(&self, transfer: Transfer) -> Result<(InventoryRecord, InventoryRecord)>;

    /// Changes on-hand stock directly, creating the record if needed.
    async fn adjust(&self, adjustment: Adjustment) -> Result<InventoryRecord>;

    async fn stock(&self, product_id: ProductId) -> Result<StockLevel>;

    async fn record(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRecord>>;

    /// Newest first.
    async fn movements(&self, product_id: ProductId, limit: usize) -> Result<Vec<StockMovement>>;

    async fn alerts(&self, include_acknowledged: bool) -> Result<Vec<StockAlert>>;

    async fn acknowledge_alert(&self, alert_id: Uuid, user: UserId) -> Result<StockAlert>;

    async fn configure_thresholds(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        low_stock_threshold: i64,
        max_stock_level: Option<i64>,
    ) -> Result<InventoryRecord>;

    /// Every reservation still holding stock, oldest first.
    async fn active_reservations(&self) -> Result<Vec<Reservation>>;
}
