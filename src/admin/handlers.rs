use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::cache::CacheStats;
use crate::context::GatewayStatus;
use crate::http::server::AppState;
use crate::resilience::CircuitStatus;
use crate::security::BucketStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    #[serde(flatten)]
    pub gateway: GatewayStatus,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        gateway: state.pipeline.status(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<BTreeMap<String, CircuitStatus>> {
    Json(state.context.breakers.status())
}

pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if state.context.breakers.reset(&key) {
        tracing::info!(circuit = %key, "Circuit reset via admin API");
        Ok(Json(json!({ "reset": key })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn reset_all_circuits(State(state): State<AppState>) -> Json<Value> {
    state.context.breakers.reset_all();
    tracing::info!("All circuits reset via admin API");
    Json(json!({ "reset": "all" }))
}

pub async fn get_limits(State(state): State<AppState>) -> Json<BTreeMap<String, BucketStatus>> {
    Json(state.context.limiter.status())
}

pub async fn get_cache(State(state): State<AppState>) -> Json<BTreeMap<String, CacheStats>> {
    Json(state.context.caches.stats())
}

pub async fn clear_cache(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if state.context.caches.clear(&provider) {
        tracing::info!(provider = %provider, "Cache cleared via admin API");
        Ok(Json(json!({ "cleared": provider })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn invalidate_token(
    State(state): State<AppState>,
    Path((provider, user_id)): Path<(String, String)>,
) -> Json<Value> {
    let invalidated = state.context.tokens.invalidate(&user_id, &provider);
    let purged = state.context.caches.invalidate_user(&provider, &user_id);
    tracing::info!(provider = %provider, user_id = %user_id, invalidated, purged, "Token invalidated via admin API");
    Json(json!({
        "provider": provider,
        "userId": user_id,
        "invalidated": invalidated,
        "purgedCacheEntries": purged
    }))
}
