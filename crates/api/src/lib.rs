//! HTTP gateway for the order fulfillment saga.
//!
//! Exposes orders, payments, inventory, wallets and notifications over REST,
//! with structured logging (tracing) and Prometheus metrics. The caller's
//! identity arrives in gateway headers (see [`actor`]).

pub mod actor;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use axum::routing::{get, patch, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, Backends};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create).get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/status", patch(routes::orders::update_status))
        .route("/payments/process", post(routes::payments::process))
        .route("/payments/refund", post(routes::payments::refund))
        .route("/payments/{id}", get(routes::payments::get))
        .route("/payments/{id}/confirm", post(routes::payments::confirm))
        .route("/inventory/reserve", post(routes::inventory::reserve))
        .route("/inventory/release", post(routes::inventory::release))
        .route("/inventory/commit", post(routes::inventory::commit))
        .route("/inventory/transfer", post(routes::inventory::transfer))
        .route("/inventory/adjust", post(routes::inventory::adjust))
        .route("/inventory/thresholds", put(routes::inventory::thresholds))
        .route("/inventory/alerts", get(routes::inventory::alerts))
        .route(
            "/inventory/alerts/{id}/acknowledge",
            post(routes::inventory::acknowledge),
        )
        .route("/inventory/{product_id}", get(routes::inventory::stock))
        .route(
            "/inventory/{product_id}/movements",
            get(routes::inventory::movements),
        )
        .route("/wallets/me", get(routes::wallets::get))
        .route("/wallets/me/transactions", get(routes::wallets::transactions))
        .route("/wallets/topup", post(routes::wallets::top_up))
        .route("/wallets/transfer", post(routes::wallets::transfer))
        .route("/events/order", post(routes::events::order))
        .route("/events/delivery", post(routes::events::delivery))
        .route("/notifications/stream", get(routes::notifications::stream))
        .route("/catalog/products", post(routes::catalog::create_product))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
