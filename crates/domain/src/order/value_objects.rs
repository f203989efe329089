//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{Money, ProductId, UserId, VariantId, WarehouseId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OrderError, OrderStatus};

/// Human-readable order reference, e.g. `ORD-20250114-3F9A12BC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Generates a number from the placement date and a random suffix.
    pub fn generate(placed_at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        Self(format!("ORD-{}-{}", placed_at.format("%Y%m%d"), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Address snapshot taken when the order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub recipient_name: String,
    pub phone: String,
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: Option<String>,
    pub city: String,
    pub province: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub delivery_instructions: Option<String>,
}

impl Address {
    /// Checks that the fields a courier needs are present.
    pub fn validate(&self) -> Result<(), OrderError> {
        let required = [
            ("recipient_name", &self.recipient_name),
            ("phone", &self.phone),
            ("address_line1", &self.address_line1),
            ("city", &self.city),
            ("province", &self.province),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::MissingAddressField { field });
            }
        }
        Ok(())
    }
}

/// A priced line of an order, allocated to one warehouse.
///
/// Prices are snapshots; later catalog changes do not affect placed orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub warehouse_id: WarehouseId,
    pub product_name: String,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

impl OrderItem {
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id,
            variant_id: None,
            warehouse_id,
            product_name: product_name.into(),
            variant_name: None,
            sku: None,
            quantity,
            unit_price,
            total_price: unit_price.multiply(quantity),
        }
    }

    pub fn with_variant(mut self, variant_id: VariantId, variant_name: Option<String>) -> Self {
        self.variant_id = Some(variant_id);
        self.variant_name = variant_name;
        self
    }

    pub fn with_sku(mut self, sku: Option<String>) -> Self {
        self.sku = sku;
        self
    }
}

/// Monetary breakdown of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_amount: Money,
    pub total_amount: Money,
}

/// One entry of the order's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub changed_by: UserId,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Timestamps stamped by status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatusTimestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
