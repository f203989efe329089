//! Product registration for the in-process catalog.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use common::{Money, Role, UserId};
use saga::{Product, ProductVariant, SagaError};
use serde::Deserialize;

use crate::actor::CurrentActor;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VariantRequest {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    /// Only admins may register products for another retailer.
    #[serde(default)]
    pub retailer_id: Option<UserId>,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub price: Money,
    #[serde(default)]
    pub variants: Vec<VariantRequest>,
}

/// POST /catalog/products
pub async fn create_product(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<ProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let Json(request) = payload?;

    let retailer_id = match (actor.role, request.retailer_id) {
        (Role::Admin, Some(retailer_id)) => retailer_id,
        (Role::Admin | Role::Retailer, None) => actor.id,
        (Role::Retailer, Some(retailer_id)) if retailer_id == actor.id => retailer_id,
        _ => return Err(SagaError::forbidden("Not allowed to register products").into()),
    };
    if request.name.trim().is_empty() {
        return Err(SagaError::validation("Product name is required").into());
    }
    let prices = std::iter::once(request.price)
        .chain(request.variants.iter().filter_map(|v| v.price));
    for price in prices {
        if !price.is_positive() {
            return Err(SagaError::validation("Prices must be positive").into());
        }
        ledger::validate_amount(price).map_err(SagaError::from)?;
    }

    let mut product = Product::new(retailer_id, request.name, request.price);
    product.sku = request.sku;
    for variant in request.variants {
        let mut entry = ProductVariant::new(variant.name, variant.price);
        entry.sku = variant.sku;
        product = product.with_variant(entry);
    }

    state.catalog.upsert(product.clone()).await;
    tracing::info!(product_id = %product.id, %retailer_id, "product registered");
    Ok((StatusCode::CREATED, Json(product)))
}
