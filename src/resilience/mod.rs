//! Resilience patterns for transient provider failures
//!
//! - [`retry`]: retry with exponential backoff and a retryable-error predicate

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy, Retryable};
