pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/circuits/reset", post(reset_all_circuits))
        .route("/admin/circuits/{key}/reset", post(reset_circuit))
        .route("/admin/limits", get(get_limits))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/{provider}/clear", post(clear_cache))
        .route("/admin/tokens/{provider}/{user_id}", delete(invalidate_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
