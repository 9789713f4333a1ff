//! HTTP surface of the gateway.
//!
//! # Data Flow
//! ```text
//! Client request
//!     → request.rs (request ID, tracing)
//!     → server.rs (routing: /v1/invoke, /health, /admin/*)
//!     → auth.rs (caller key on /v1/invoke)
//!     → RequestPipeline
//!     → response.rs (ApiError → JSON error response)
//! ```

pub mod auth;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
