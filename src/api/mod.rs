pub mod health;
pub mod status;

use crate::orchestration::QualityMonitor;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<QualityMonitor>,
}

impl AppState {
    pub fn new(monitor: Arc<QualityMonitor>) -> Self {
        Self { monitor }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/deals", get(status::get_deals))
        .route("/v1/deals/:deal_id", get(status::get_deal))
        .route("/v1/suppliers", get(status::get_suppliers))
        .route("/v1/stats", get(status::get_stats))
        .layer(cors)
        .with_state(state)
}
