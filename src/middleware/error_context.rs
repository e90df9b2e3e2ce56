//! Error-context middleware (C9): generates/propagates ids, captures
//! pre/post snapshots, and stashes the [`ErrorContext`] for error enrichment.

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::Context;
use crate::error::ErrorContext;
use crate::middleware::{Middleware, MiddlewareError};
use crate::request::{Request, Response};
use crate::snapshot::{Snapshot, SnapshotConfig};

pub const DEFAULT_REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const DEFAULT_CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

pub struct ErrorContextMiddleware {
    pub request_id_header: String,
    pub correlation_id_header: String,
    pub generate_request_id: bool,
    pub snapshot_config: SnapshotConfig,
}

impl Default for ErrorContextMiddleware {
    fn default() -> Self {
        Self {
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            correlation_id_header: DEFAULT_CORRELATION_ID_HEADER.to_string(),
            generate_request_id: true,
            snapshot_config: SnapshotConfig::default(),
        }
    }
}

impl ErrorContextMiddleware {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Middleware for ErrorContextMiddleware {
    fn name(&self) -> &str {
        "error_context"
    }

    async fn on_request(
        &self,
        mut ctx: Context,
        mut req: Request,
    ) -> Result<(Context, Request), MiddlewareError> {
        let mut error_context = ErrorContext::new();

        let request_id = match req.header_str(&self.request_id_header) {
            Some(existing) => existing.to_string(),
            None if self.generate_request_id => {
                let id = Uuid::new_v4().to_string();
                req = req.with_header(&self.request_id_header, &id);
                id
            }
            None => String::new(),
        };
        if !request_id.is_empty() {
            error_context = error_context.with_request_id(request_id.clone());
            ctx.request_id = Some(request_id);
        }

        let correlation_id = match req.header_str(&self.correlation_id_header) {
            Some(existing) => existing.to_string(),
            None if self.generate_request_id => {
                let id = Uuid::new_v4().to_string();
                req = req.with_header(&self.correlation_id_header, &id);
                id
            }
            None => String::new(),
        };
        if !correlation_id.is_empty() {
            error_context = error_context.with_correlation_id(correlation_id.clone());
            ctx.correlation_id = Some(correlation_id);
        }

        if let Some(provider) = &ctx.provider {
            error_context = error_context.with_provider(provider.clone());
        }
        if let Some(model) = &ctx.model {
            error_context = error_context.with_model(model.clone());
        }

        let snapshot = Snapshot::from_request(&req, &self.snapshot_config);
        error_context = error_context.with_request_snapshot(snapshot);

        ctx.error_context = Some(error_context);
        Ok((ctx, req))
    }

    async fn on_response(
        &self,
        mut ctx: Context,
        _req: &Request,
        resp: Response,
    ) -> Result<(Context, Response), MiddlewareError> {
        let mut error_context = ctx.error_context.take().unwrap_or_else(ErrorContext::new);
        error_context.mark_duration();
        let snapshot = Snapshot::from_response(&resp, &self.snapshot_config);
        error_context = error_context.with_response_snapshot(snapshot);
        ctx.error_context = Some(error_context);
        Ok((ctx, resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use url::Url;

    fn sample_request() -> Request {
        Request::new(http::Method::POST, Url::parse("https://example.com/v1/messages").unwrap())
            .with_body(Bytes::from_static(b"{}"))
    }

    #[tokio::test]
    async fn generates_request_id_when_absent() {
        let mw = ErrorContextMiddleware::new();
        let (ctx, req) = mw.on_request(Context::new(), sample_request()).await.unwrap();
        assert!(ctx.request_id.is_some());
        assert!(req.header_str(DEFAULT_REQUEST_ID_HEADER).is_some());
        assert!(ctx.error_context.is_some());
    }

    #[tokio::test]
    async fn preserves_existing_request_id() {
        let mw = ErrorContextMiddleware::new();
        let req = sample_request().with_header(DEFAULT_REQUEST_ID_HEADER, "caller-set-id");
        let (ctx, _req) = mw.on_request(Context::new(), req).await.unwrap();
        assert_eq!(ctx.request_id.as_deref(), Some("caller-set-id"));
    }

    #[tokio::test]
    async fn response_phase_computes_duration() {
        let mw = ErrorContextMiddleware::new();
        let (ctx, req) = mw.on_request(Context::new(), sample_request()).await.unwrap();
        let resp = Response::new(http::StatusCode::OK);
        let (ctx, _resp) = mw.on_response(ctx, &req, resp).await.unwrap();
        assert!(ctx.error_context.unwrap().duration.is_some());
    }

    #[tokio::test]
    async fn response_phase_defensive_when_context_missing() {
        let mw = ErrorContextMiddleware::new();
        let resp = Response::new(http::StatusCode::OK);
        let (ctx, _resp) = mw
            .on_response(Context::new(), &sample_request(), resp)
            .await
            .unwrap();
        assert!(ctx.error_context.is_some());
    }
}
