use async_trait::async_trait;
use chrono::Utc;
use common::{ProductId, UserId, WarehouseId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{
    Adjustment, InventoryLedger, InventoryRecord, MovementType, Reservation, ReservationStatus,
    StockAlert, StockDirection, StockLevel, StockMovement, Transfer, evaluate_alerts,
    record_reservation_outcome, validate_quantity, validate_thresholds,
};
use crate::error::decode_error;
use crate::{LedgerError, Reference, Result};

const RECORD_COLUMNS: &str =
    "product_id, warehouse_id, on_hand, reserved, low_stock_threshold, max_stock_level, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, movement_type, direction, quantity, \
     quantity_before, quantity_after, reference, performed_by, notes, created_at";

const ALERT_COLUMNS: &str = "id, product_id, warehouse_id, alert_type, quantity, acknowledged, \
     acknowledged_by, acknowledged_at, created_at";

/// PostgreSQL-backed inventory ledger.
///
/// Reservations use a single conditional `UPDATE ... WHERE on_hand - reserved >= $n`
/// so the availability check and the increment are one statement. Transfers
/// and adjustments lock their rows with `SELECT ... FOR UPDATE`, always in
/// (product, warehouse) order.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        Ok(InventoryRecord {
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id")?),
            on_hand: row.try_get("on_hand")?,
            reserved: row.try_get("reserved")?,
            low_stock_threshold: row.try_get("low_stock_threshold")?,
            max_stock_level: row.try_get("max_stock_level")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let status: String = row.try_get("status")?;
        Ok(Reservation {
            id: row.try_get("id")?,
            reference: Reference::new(row.try_get::<String, _>("reference")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id")?),
            quantity: row.try_get("quantity")?,
            status: status.parse().map_err(decode_error)?,
            created_at: row.try_get("created_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }

    fn row_to_movement(row: PgRow) -> Result<StockMovement> {
        let movement_type: String = row.try_get("movement_type")?;
        let direction: String = row.try_get("direction")?;
        let performed_by: Option<Uuid> = row.try_get("performed_by")?;
        Ok(StockMovement {
            id: row.try_get("id")?,
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id")?),
            movement_type: movement_type.parse().map_err(decode_error)?,
            direction: direction.parse().map_err(decode_error)?,
            quantity: row.try_get("quantity")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            reference: row.try_get("reference")?,
            performed_by: performed_by.map(UserId::from_uuid),
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_alert(row: PgRow) -> Result<StockAlert> {
        let alert_type: String = row.try_get("alert_type")?;
        let acknowledged_by: Option<Uuid> = row.try_get("acknowledged_by")?;
        Ok(StockAlert {
            id: row.try_get("id")?,
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id")?),
            alert_type: alert_type.parse().map_err(decode_error)?,
            quantity: row.try_get("quantity")?,
            acknowledged: row.try_get("acknowledged")?,
            acknowledged_by: acknowledged_by.map(UserId::from_uuid),
            acknowledged_at: row.try_get("acknowledged_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn lock_record(
        conn: &mut PgConnection,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM inventory \
             WHERE product_id = $1 AND warehouse_id = $2 FOR UPDATE"
        ))
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn ensure_record(
        conn: &mut PgConnection,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO inventory (product_id, warehouse_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn write_record(
        conn: &mut PgConnection,
        record: &InventoryRecord,
    ) -> Result<InventoryRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory
            SET on_hand = $3, reserved = $4, updated_at = NOW()
            WHERE product_id = $1 AND warehouse_id = $2
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record.product_id.as_uuid())
        .bind(record.warehouse_id.as_uuid())
        .bind(record.on_hand)
        .bind(record.reserved)
        .fetch_one(&mut *conn)
        .await?;

        Self::row_to_record(row)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_movement(
        conn: &mut PgConnection,
        record: &InventoryRecord,
        movement_type: MovementType,
        direction: StockDirection,
        quantity: i64,
        before: i64,
        after: i64,
        reference: Option<&str>,
        performed_by: Option<UserId>,
        notes: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (id, product_id, warehouse_id, movement_type, direction,
                                         quantity, quantity_before, quantity_after, reference,
                                         performed_by, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.product_id.as_uuid())
        .bind(record.warehouse_id.as_uuid())
        .bind(movement_type.as_str())
        .bind(direction.as_str())
        .bind(quantity)
        .bind(before)
        .bind(after)
        .bind(reference)
        .bind(performed_by.map(|u| u.as_uuid()))
        .bind(notes)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Inserts the alerts `record` needs. The partial unique index on open
    /// alerts turns duplicates into no-ops.
    async fn raise_alerts(conn: &mut PgConnection, record: &InventoryRecord) -> Result<()> {
        for alert_type in evaluate_alerts(record) {
            let alert = StockAlert::new(record, alert_type);
            let inserted = sqlx::query(
                r#"
                INSERT INTO stock_alerts
                    (id, product_id, warehouse_id, alert_type, quantity, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (product_id, warehouse_id, alert_type) WHERE NOT acknowledged DO NOTHING
                "#,
            )
            .bind(alert.id)
            .bind(alert.product_id.as_uuid())
            .bind(alert.warehouse_id.as_uuid())
            .bind(alert.alert_type.as_str())
            .bind(alert.quantity)
            .bind(alert.created_at)
            .execute(&mut *conn)
            .await?;

            if inserted.rows_affected() > 0 {
                tracing::info!(
                    product_id = %record.product_id,
                    warehouse_id = %record.warehouse_id,
                    %alert_type,
                    on_hand = record.on_hand,
                    "stock alert raised"
                );
            }
        }
        Ok(())
    }

    /// Closes the active reservations under `reference` with `status` and
    /// moves their quantity off the reserved count. Returns the total closed.
    async fn close_reservations(
        &self,
        reference: &Reference,
        status: ReservationStatus,
        performed_by: Option<UserId>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, closed_at = NOW()
            WHERE reference = $1 AND status = 'active'
            RETURNING product_id, warehouse_id, quantity
            "#,
        )
        .bind(reference.as_str())
        .bind(status.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let mut total = 0u64;
        for row in closed {
            let product_id = ProductId::from_uuid(row.try_get("product_id")?);
            let warehouse_id = WarehouseId::from_uuid(row.try_get("warehouse_id")?);
            let quantity: i64 = row.try_get("quantity")?;

            let mut record = Self::lock_record(&mut tx, product_id, warehouse_id)
                .await?
                .ok_or_else(|| {
                    LedgerError::not_found(
                        "inventory record",
                        format!("{product_id}/{warehouse_id}"),
                    )
                })?;

            let (movement_type, direction, before, after) = match status {
                ReservationStatus::Committed => {
                    let before = record.on_hand;
                    record.on_hand -= quantity;
                    record.reserved -= quantity;
                    (MovementType::Sold, StockDirection::Out, before, record.on_hand)
                }
                _ => {
                    let before = record.reserved;
                    record.reserved -= quantity;
                    (MovementType::Released, StockDirection::In, before, record.reserved)
                }
            };

            let record = Self::write_record(&mut tx, &record).await?;
            Self::insert_movement(
                &mut tx,
                &record,
                movement_type,
                direction,
                quantity,
                before,
                after,
                Some(reference.as_str()),
                performed_by,
                None,
            )
            .await?;
            Self::raise_alerts(&mut tx, &record).await?;
            total += quantity.unsigned_abs();
        }

        tx.commit().await?;
        Ok(total)
    }
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    #[tracing::instrument(skip(self, reference), fields(reference = %reference))]
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
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            r#"
            UPDATE inventory
            SET reserved = reserved + $3, updated_at = NOW()
            WHERE product_id = $1 AND warehouse_id = $2 AND on_hand - reserved >= $3
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let current = sqlx::query(&format!(
                "SELECT {RECORD_COLUMNS} FROM inventory WHERE product_id = $1 AND warehouse_id = $2"
            ))
            .bind(product_id.as_uuid())
            .bind(warehouse_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;

            return match current {
                None => Err(LedgerError::not_found(
                    "inventory record",
                    format!("{product_id}/{warehouse_id}"),
                )),
                Some(row) => {
                    let record = Self::row_to_record(row)?;
                    record_reservation_outcome("insufficient");
                    Err(LedgerError::InsufficientStock {
                        product_id,
                        warehouse_id,
                        requested: quantity,
                        available: record.available(),
                    })
                }
            };
        };
        let record = Self::row_to_record(row)?;

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
        sqlx::query(
            r#"
            INSERT INTO reservations
                (id, reference, product_id, warehouse_id, quantity, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(reservation.id)
        .bind(reference.as_str())
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(quantity)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_movement(
            &mut tx,
            &record,
            MovementType::Reserved,
            StockDirection::Out,
            quantity,
            record.reserved - quantity,
            record.reserved,
            Some(reference.as_str()),
            performed_by,
            None,
        )
        .await?;
        Self::raise_alerts(&mut tx, &record).await?;

        tx.commit().await?;
        record_reservation_outcome("reserved");
        Ok(reservation)
    }

    #[tracing::instrument(skip(self, reference), fields(reference = %reference))]
    async fn release(&self, reference: &Reference, performed_by: Option<UserId>) -> Result<u64> {
        let released = self
            .close_reservations(reference, ReservationStatus::Released, performed_by)
            .await?;
        if released > 0 {
            record_reservation_outcome("released");
        }
        Ok(released)
    }

    #[tracing::instrument(skip(self, reference), fields(reference = %reference))]
    async fn commit(&self, reference: &Reference, performed_by: Option<UserId>) -> Result<u64> {
        let committed = self
            .close_reservations(reference, ReservationStatus::Committed, performed_by)
            .await?;
        if committed > 0 {
            record_reservation_outcome("committed");
        }
        Ok(committed)
    }

    #[tracing::instrument(skip(self))]
    async fn transfer(&self, transfer: Transfer) -> Result<(InventoryRecord, InventoryRecord)> {
        transfer.validate()?;
        let quantity = i64::from(transfer.quantity);
        let product_id = transfer.product_id;
        let mut tx = self.pool.begin().await?;

        Self::ensure_record(&mut tx, product_id, transfer.to).await?;

        // Lock in warehouse order so opposing transfers cannot deadlock.
        let (first, second) = if transfer.from < transfer.to {
            (transfer.from, transfer.to)
        } else {
            (transfer.to, transfer.from)
        };
        let first_record = Self::lock_record(&mut tx, product_id, first).await?;
        let second_record = Self::lock_record(&mut tx, product_id, second).await?;
        let (source, destination) = if first == transfer.from {
            (first_record, second_record)
        } else {
            (second_record, first_record)
        };

        let mut source = source.ok_or_else(|| {
            LedgerError::not_found("inventory record", format!("{product_id}/{}", transfer.from))
        })?;
        let mut destination = destination.ok_or_else(|| {
            LedgerError::not_found("inventory record", format!("{product_id}/{}", transfer.to))
        })?;

        if source.available() < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id,
                warehouse_id: transfer.from,
                requested: quantity,
                available: source.available(),
            });
        }

        let source_before = source.on_hand;
        let destination_before = destination.on_hand;
        source.on_hand -= quantity;
        destination.on_hand += quantity;
        let source = Self::write_record(&mut tx, &source).await?;
        let destination = Self::write_record(&mut tx, &destination).await?;

        let reference = format!("transfer:{}->{}", transfer.from, transfer.to);
        Self::insert_movement(
            &mut tx,
            &source,
            MovementType::Transfer,
            StockDirection::Out,
            quantity,
            source_before,
            source.on_hand,
            Some(&reference),
            transfer.performed_by,
            transfer.notes.as_deref(),
        )
        .await?;
        Self::insert_movement(
            &mut tx,
            &destination,
            MovementType::Transfer,
            StockDirection::In,
            quantity,
            destination_before,
            destination.on_hand,
            Some(&reference),
            transfer.performed_by,
            transfer.notes.as_deref(),
        )
        .await?;
        Self::raise_alerts(&mut tx, &source).await?;
        Self::raise_alerts(&mut tx, &destination).await?;

        tx.commit().await?;
        Ok((source, destination))
    }

    #[tracing::instrument(skip(self))]
    async fn adjust(&self, adjustment: Adjustment) -> Result<InventoryRecord> {
        let mut tx = self.pool.begin().await?;
        Self::ensure_record(&mut tx, adjustment.product_id, adjustment.warehouse_id).await?;

        let mut record = Self::lock_record(&mut tx, adjustment.product_id, adjustment.warehouse_id)
            .await?
            .ok_or_else(|| {
                LedgerError::not_found(
                    "inventory record",
                    format!("{}/{}", adjustment.product_id, adjustment.warehouse_id),
                )
            })?;

        let after = adjustment.validate(&record)?;
        let before = record.on_hand;
        record.on_hand = after;
        let record = Self::write_record(&mut tx, &record).await?;

        Self::insert_movement(
            &mut tx,
            &record,
            adjustment.reason,
            adjustment.direction(),
            adjustment.delta.abs(),
            before,
            after,
            None,
            adjustment.performed_by,
            adjustment.notes.as_deref(),
        )
        .await?;
        Self::raise_alerts(&mut tx, &record).await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn stock(&self, product_id: ProductId) -> Result<StockLevel> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM inventory WHERE product_id = $1"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(StockLevel::from_records(product_id, records))
    }

    async fn record(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM inventory WHERE product_id = $1 AND warehouse_id = $2"
        ))
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn movements(&self, product_id: ProductId, limit: usize) -> Result<Vec<StockMovement>> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE product_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(product_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_movement).collect()
    }

    async fn alerts(&self, include_acknowledged: bool) -> Result<Vec<StockAlert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM stock_alerts \
             WHERE $1 OR NOT acknowledged ORDER BY created_at ASC"
        ))
        .bind(include_acknowledged)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_alert).collect()
    }

    async fn acknowledge_alert(&self, alert_id: Uuid, user: UserId) -> Result<StockAlert> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_alerts
            SET acknowledged = TRUE, acknowledged_by = $2, acknowledged_at = NOW()
            WHERE id = $1 AND NOT acknowledged
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert_id)
        .bind(user.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_alert(row);
        }

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM stock_alerts WHERE id = $1")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Err(LedgerError::AlreadyProcessed(format!(
                "alert {alert_id} is already acknowledged"
            ))),
            None => Err(LedgerError::not_found("stock alert", alert_id)),
        }
    }

    async fn configure_thresholds(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        low_stock_threshold: i64,
        max_stock_level: Option<i64>,
    ) -> Result<InventoryRecord> {
        validate_thresholds(low_stock_threshold, max_stock_level)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory
            SET low_stock_threshold = $3, max_stock_level = $4, updated_at = NOW()
            WHERE product_id = $1 AND warehouse_id = $2
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(low_stock_threshold)
        .bind(max_stock_level)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            LedgerError::not_found("inventory record", format!("{product_id}/{warehouse_id}"))
        })?;

        let record = Self::row_to_record(row)?;
        Self::raise_alerts(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn active_reservations(&self) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference, product_id, warehouse_id, quantity, status, created_at, closed_at
            FROM reservations
            WHERE status = 'active'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}
