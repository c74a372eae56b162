//! Read-only view of the monitor's registries.

use super::AppState;
use crate::error::AppError;
use crate::orchestration::{DealStatus, MonitorStats, SupplierStatus};
use axum::extract::{Path, State};
use axum::Json;

pub async fn get_deals(State(state): State<AppState>) -> Json<Vec<DealStatus>> {
    Json(state.monitor.deals())
}

pub async fn get_deal(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
) -> Result<Json<DealStatus>, AppError> {
    state
        .monitor
        .deals()
        .into_iter()
        .find(|d| d.deal_id.as_str() == deal_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("deal {}", deal_id)))
}

pub async fn get_suppliers(State(state): State<AppState>) -> Json<Vec<SupplierStatus>> {
    Json(state.monitor.suppliers())
}

pub async fn get_stats(State(state): State<AppState>) -> Json<MonitorStats> {
    Json(state.monitor.stats())
}
