use super::AppState;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the monitor is serving; reports how much it is watching.
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.monitor.stats();
    Json(serde_json::json!({
        "status": "ready",
        "deals": stats.deals,
        "suppliers": stats.suppliers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
