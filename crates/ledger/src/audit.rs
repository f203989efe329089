//! Append-only audit trail of financial and administrative actions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::Result;
use crate::error::decode_error;

wire_enum!(
    AuditOutcome, "audit outcome" {
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: UserId,
    /// Dotted action name, e.g. `payment.refunded`.
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    fn new(
        actor_id: UserId,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            outcome,
            details: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn succeeded(
        actor_id: UserId,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
    ) -> Self {
        Self::new(actor_id, action, resource_type, resource_id, AuditOutcome::Succeeded)
    }

    /// A failed attempt; `error` is kept under `details.error`.
    pub fn failed(
        actor_id: UserId,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        error: impl ToString,
    ) -> Self {
        Self::new(actor_id, action, resource_type, resource_id, AuditOutcome::Failed)
            .with_details(serde_json::json!({ "error": error.to_string() }))
    }

    /// Merges `details` into the record. Non-object values replace it.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        match details {
            serde_json::Value::Object(extra) if self.details.is_object() => {
                if let Some(existing) = self.details.as_object_mut() {
                    existing.extend(extra);
                }
            }
            other => self.details = other,
        }
        self
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;

    /// Oldest first.
    async fn records_for(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditRecord>>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn records_for(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.resource_type == resource_type && r.resource_id == resource_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<AuditRecord> {
        let outcome: String = row.try_get("outcome")?;
        Ok(AuditRecord {
            id: row.try_get("id")?,
            actor_id: UserId::from_uuid(row.try_get("actor_id")?),
            action: row.try_get("action")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            outcome: outcome.parse().map_err(decode_error)?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
                (id, actor_id, action, resource_type, resource_id, outcome, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.actor_id.as_uuid())
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(record.outcome.as_str())
        .bind(&record.details)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn records_for(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, resource_type, resource_id, outcome, details, created_at
            FROM audit_log
            WHERE resource_type = $1 AND resource_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
