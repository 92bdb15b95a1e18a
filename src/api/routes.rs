//! API route definitions.

use super::state::AppState;
use crate::scheduler::RefreshOutcome;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/monitor/live", get(live_view))
        .route("/monitor/status", get(monitor_status))
        .route("/monitor/refresh", post(refresh))
        .route("/monitor/pause", post(pause))
        .route("/monitor/resume", post(resume))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn live_view(State(state): State<AppState>) -> Json<Value> {
    let view = state.monitor.view();
    let status = state.monitor.status();
    Json(json!({
        "data": {
            "sessions": &view.rows,
            "counts": &view.counts,
        },
        "meta": status,
    }))
}

async fn monitor_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.monitor.status() }))
}

async fn refresh(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let outcome = state.monitor.refresh_now().await;
    let code = match outcome {
        RefreshOutcome::Rejected => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(json!({ "data": outcome, "meta": state.monitor.status() })),
    )
}

async fn pause(State(state): State<AppState>) -> Json<Value> {
    state.monitor.pause();
    Json(json!({ "data": state.monitor.status() }))
}

async fn resume(State(state): State<AppState>) -> Json<Value> {
    state.monitor.resume();
    Json(json!({ "data": state.monitor.status() }))
}
