//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the invoke and admin surfaces
//! - Wire up middleware (tracing, body limit, request ID, caller auth)
//! - Run descriptors posted to `/v1/invoke` through the pipeline
//! - Serve until the shutdown signal fires, then drain

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::context::GatewayContext;
use crate::http::auth::invoke_auth_middleware;
use crate::http::request::with_request_id;
use crate::lifecycle::{Gateway, Shutdown};
use crate::pipeline::{ApiError, ApiResponse, RequestDescriptor, RequestPipeline};
use crate::security::headers::redact_map;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
    pub context: Arc<GatewayContext>,
}

impl AppState {
    pub fn config(&self) -> &GatewayConfig {
        &self.context.config
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(gateway: &Gateway) -> Self {
        let state = AppState {
            pipeline: gateway.pipeline.clone(),
            context: gateway.context.clone(),
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        let max_body_size = state.config().listener.max_body_size;
        let admin_enabled = state.config().admin.enabled;

        // route_layer covers only the routes above it, so /health stays open.
        let mut router = Router::new()
            .route("/v1/invoke", post(invoke_handler))
            .route_layer(middleware::from_fn_with_state(state.clone(), invoke_auth_middleware))
            .route("/health", get(health_handler))
            .with_state(state.clone());

        if admin_enabled {
            router = router.merge(setup_admin_router(state));
        }

        with_request_id(router.layer(DefaultBodyLimit::max(max_body_size)))
    }

    /// The fully layered router, for embedding or tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Run one request descriptor through the pipeline.
async fn invoke_handler(
    State(state): State<AppState>,
    Json(descriptor): Json<RequestDescriptor>,
) -> Result<Json<ApiResponse>, ApiError> {
    tracing::debug!(
        provider = %descriptor.provider,
        operation = %descriptor.operation,
        method = %descriptor.method,
        headers = ?redact_map(&descriptor.headers, &[]),
        "Invoke request"
    );
    state.pipeline.request(descriptor).await.map(Json)
}

async fn health_handler() -> &'static str {
    "ok"
}
