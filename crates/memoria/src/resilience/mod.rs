//! Resilience patterns used by the memoization engine
//!
//! Currently this is retry with exponential backoff, applied around every
//! computation a cache runs on a miss.

pub mod retry;

pub use retry::{BackoffStrategy, RetryConfig, RetryExecutor, RetryExhausted};
