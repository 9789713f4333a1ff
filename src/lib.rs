//! Integration gateway library.
//!
//! A resilient outbound API invocation pipeline for third-party integrations,
//! with an Axum surface for invoking it and inspecting its state.

pub mod admin;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod providers;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use context::{GatewayContext, GatewayStatus};
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
pub use pipeline::{ApiError, ApiResponse, ErrorCode, RequestDescriptor, RequestOptions, RequestPipeline};
