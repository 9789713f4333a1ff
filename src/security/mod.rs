//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → rate_limit.rs (per provider+user admission)
//!     → headers.rs (redact secrets before anything is logged)
//!     → Pass to the circuit-breaker-guarded call
//! ```
//!
//! # Design Decisions
//! - Admission is FIFO per bucket; nobody jumps the queue
//! - Secrets never reach log output

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{BucketStatus, RateLimitError, RateLimiter};
