use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "aduana-liquidation",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await,
    }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .active_sessions
        .set(state.sessions.len().await as i64);
    state.metrics.render()
}
