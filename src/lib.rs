//! Client-side request pipeline for routing Anthropic-shaped calls to AWS
//! Bedrock, Google Vertex AI, and fallback compositions of providers.
//!
//! The pipeline is a [`middleware::MiddlewareChain`] of [`middleware::Middleware`]
//! values. Each middleware may rewrite an outbound [`Request`] and/or an
//! inbound [`Response`]; a [`Context`] carries request-scoped state (ids,
//! provider/model bookkeeping, the stashed [`error::ErrorContext`]) across
//! the async hops between them. [`retry::execute`] wraps a whole round-trip
//! with policy-driven backoff, and [`fallback::FallbackProvider`] composes
//! an ordered list of [`provider::Provider`]s into one logical provider.

pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod masking;
pub mod middleware;
pub mod provider;
pub mod request;
pub mod retry;
pub mod snapshot;

#[cfg(feature = "aws")]
pub mod sigv4;

pub use context::Context;
pub use error::{EnrichedError, ErrorContext, PipelineError, RichError};
pub use middleware::{Middleware, MiddlewareChain};
pub use request::{Request, Response};
