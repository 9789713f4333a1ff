//! Resilient outbound request pipeline.
//!
//! Every provider call (CRM, documents, accounting, LLM, payments) goes
//! through [`RequestPipeline`], which composes caching, rate limiting,
//! circuit breaking, timeouts, retries, and credential resolution around a
//! single HTTP request and classifies every failure as an [`ApiError`].

pub mod error;
pub mod executor;
pub mod request;
pub mod response;

pub use error::{ApiError, ErrorCode};
pub use executor::RequestPipeline;
pub use request::{AuthMethod, CacheOptions, HttpMethod, RequestDescriptor, RequestOptions};
pub use response::ApiResponse;
