//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! One pipeline attempt:
//!     → circuit_breaker.rs (fail fast while the operation's breaker is open)
//!     → timeouts.rs (enforce the per-call deadline)
//!     → On failure: retries.rs (check if retryable, retry with backoff.rs)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for transient failures (network, 5xx, 429)
//! - Circuit breakers are per provider operation, not global

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerManager, CircuitState, CircuitStatus};
pub use retries::{with_retry, RetryPolicy};
