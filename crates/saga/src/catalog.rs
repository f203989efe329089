//! Product lookup used to price order lines.
//!
//! Catalog browsing lives elsewhere; the coordinator only needs to resolve a
//! product (and optionally a variant) to its current name and unit price.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId, UserId, VariantId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub retailer_id: UserId,
    pub name: String,
    pub sku: Option<String>,
    pub price: Money,
    pub is_active: bool,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

impl Product {
    pub fn new(retailer_id: UserId, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: ProductId::new(),
            retailer_id,
            name: name.into(),
            sku: None,
            price,
            is_active: true,
            variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, variant: ProductVariant) -> Self {
        self.variants.push(variant);
        self
    }
}

/// A variant replaces the product's price and SKU when it carries them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub name: String,
    pub sku: Option<String>,
    pub price: Option<Money>,
}

impl ProductVariant {
    pub fn new(name: impl Into<String>, price: Option<Money>) -> Self {
        Self {
            id: VariantId::new(),
            name: name.into(),
            sku: None,
            price,
        }
    }
}

/// Point-in-time price snapshot for one order line.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedProduct {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub sku: Option<String>,
    pub unit_price: Money,
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Resolves an active product, applying the variant's price if given.
    /// Fails with `NotFound` for missing or inactive products and unknown variants.
    async fn resolve(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
    ) -> Result<PricedProduct>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn set_active(&self, product_id: ProductId, is_active: bool) {
        if let Some(product) = self.products.write().await.get_mut(&product_id) {
            product.is_active = is_active;
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn resolve(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
    ) -> Result<PricedProduct> {
        let products = self.products.read().await;
        let product = products
            .get(&product_id)
            .filter(|p| p.is_active)
            .ok_or_else(|| SagaError::not_found(format!("Product {product_id} not available")))?;

        let variant = match variant_id {
            Some(id) => Some(
                product
                    .variants
                    .iter()
                    .find(|v| v.id == id)
                    .ok_or_else(|| SagaError::not_found(format!("Variant {id} not found")))?,
            ),
            None => None,
        };

        Ok(PricedProduct {
            product_id,
            variant_id,
            product_name: product.name.clone(),
            variant_name: variant.map(|v| v.name.clone()),
            sku: variant.and_then(|v| v.sku.clone()).or_else(|| product.sku.clone()),
            unit_price: variant.and_then(|v| v.price).unwrap_or(product.price),
        })
    }
}
