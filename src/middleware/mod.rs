//! Middleware chain (C8): ordered request/response transformer pipeline with
//! insert-before/after semantics and thread-safe mutation.

#[cfg(feature = "aws")]
mod bedrock;
mod error_context;
#[cfg(feature = "vertex")]
mod vertex;

#[cfg(feature = "aws")]
pub use bedrock::{BedrockConfig, BedrockMiddleware};
pub use error_context::ErrorContextMiddleware;
#[cfg(feature = "vertex")]
pub use vertex::{RegionAvailability, VertexAuthMode, VertexConfig, VertexMiddleware};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::context::Context;
use crate::error::{enrich_error, EnrichedError, PipelineError};
use crate::request::{Request, Response};

/// The request-phase failure carries the context produced so far, so a
/// caller doing post-mortem on an aborted pass still sees its last state.
pub type MiddlewareError = (Context, PipelineError);

/// A chain-level failure: the context produced so far, and the error either
/// enriched with `ctx.error_context` (C9) or passed through unchanged if no
/// middleware had stashed one.
pub type ChainError = (Context, EnrichedError);

/// A value that may transform an outgoing request and/or an incoming
/// response. Both capabilities default to pass-through: a concrete
/// middleware overrides only the one it has, replacing runtime interface
/// sniffing with ordinary trait-method defaults.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn on_request(
        &self,
        ctx: Context,
        req: Request,
    ) -> Result<(Context, Request), MiddlewareError> {
        Ok((ctx, req))
    }

    async fn on_response(
        &self,
        ctx: Context,
        _req: &Request,
        resp: Response,
    ) -> Result<(Context, Response), MiddlewareError> {
        Ok((ctx, resp))
    }
}

/// Ordered list of middlewares. Mutation (`add`/`remove`/…) takes an
/// exclusive lock; iteration snapshots the list under a shared lock and
/// releases it before invoking middleware, so middleware bodies may mutate
/// the chain themselves without deadlocking. A consequence: a `remove`
/// racing an in-flight `process_request` may still deliver that request to
/// the removed middleware — this is documented, not a bug.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, middleware: Arc<dyn Middleware>) -> &Self {
        self.middlewares.write().await.push(middleware);
        self
    }

    /// Inserts `middleware` immediately before `target` (identified by
    /// pointer identity). Returns `false` and leaves the chain unchanged if
    /// `target` is absent.
    pub async fn add_before(&self, target: &Arc<dyn Middleware>, middleware: Arc<dyn Middleware>) -> bool {
        let mut list = self.middlewares.write().await;
        match list.iter().position(|m| Arc::ptr_eq(m, target)) {
            Some(idx) => {
                list.insert(idx, middleware);
                true
            }
            None => false,
        }
    }

    /// Inserts `middleware` immediately after `target`. Returns `false` and
    /// leaves the chain unchanged if `target` is absent.
    pub async fn add_after(&self, target: &Arc<dyn Middleware>, middleware: Arc<dyn Middleware>) -> bool {
        let mut list = self.middlewares.write().await;
        match list.iter().position(|m| Arc::ptr_eq(m, target)) {
            Some(idx) => {
                list.insert(idx + 1, middleware);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, middleware: &Arc<dyn Middleware>) -> bool {
        let mut list = self.middlewares.write().await;
        let before = list.len();
        list.retain(|m| !Arc::ptr_eq(m, middleware));
        list.len() != before
    }

    pub async fn clear(&self) {
        self.middlewares.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.middlewares.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.read().await.clone()
    }

    /// Forward pass, insertion order. Aborts on the first error, enriching it
    /// with whatever `ErrorContext` had been stashed in `ctx` by that point
    /// (C9) and returning the partial context produced so far.
    pub async fn process_request(
        &self,
        mut ctx: Context,
        mut req: Request,
    ) -> Result<(Context, Request), ChainError> {
        for middleware in self.snapshot().await {
            match middleware.on_request(ctx, req).await {
                Ok((c, r)) => {
                    ctx = c;
                    req = r;
                }
                Err((c, err)) => {
                    let enriched = enrich_error(c.error_context.clone(), err);
                    return Err((c, enriched));
                }
            }
        }
        Ok((ctx, req))
    }

    /// Reverse pass, invoked in the opposite order to `process_request`.
    /// Aborts on the first error, enriched the same way.
    pub async fn process_response(
        &self,
        req: &Request,
        mut ctx: Context,
        mut resp: Response,
    ) -> Result<(Context, Response), ChainError> {
        for middleware in self.snapshot().await.into_iter().rev() {
            match middleware.on_response(ctx, req, resp).await {
                Ok((c, r)) => {
                    ctx = c;
                    resp = r;
                }
                Err((c, err)) => {
                    let enriched = enrich_error(c.error_context.clone(), err);
                    return Err((c, enriched));
                }
            }
        }
        Ok((ctx, resp))
    }
}
