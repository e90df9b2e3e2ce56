//! Retry subsystem: policy (C5) + backoff strategy (C6) + executor (C7).

mod backoff;
mod executor;
mod policy;

pub use backoff::{BackoffStrategy, ConstantBackoff, ExponentialBackoff, JitterType, LinearBackoff};
pub use executor::{execute, execute_typed, execute_with_callback};
pub use policy::{RetryPolicy, parse_retry_after, parse_retry_after_value};
