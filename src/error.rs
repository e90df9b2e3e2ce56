//! Error taxonomy (§7), retry tagging (C1), rich error + context (C4).

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::snapshot::Snapshot;

/// Default retryable HTTP status set per the retry policy (C5).
pub const DEFAULT_RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504, 507, 511];

/// The error taxonomy from §7. Every variant knows whether it is retryable
/// and, where applicable, the HTTP status code that produced it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("bad request shape: {0}")]
    BadRequestShape(String),

    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    #[error("upstream transient error (status {status}): {message}")]
    UpstreamTransient {
        status: u16,
        message: String,
        /// `Retry-After` value parsed from the upstream response, if any.
        retry_after: Option<Duration>,
    },

    #[error("upstream permanent error (status {status}): {message}")]
    UpstreamPermanent { status: u16, message: String },

    #[error("cancelled after {attempts} attempt(s): {source}")]
    Cancelled {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("all fallback providers failed: {last}")]
    FallbackAllFailed { last: String },

    #[error("max retries exceeded: {source}")]
    MaxRetriesExceeded {
        #[source]
        source: Box<PipelineError>,
    },

    #[error("non-retryable: {source}")]
    NonRetryable {
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    /// Tags an arbitrary upstream HTTP failure per the 429/5xx classification
    /// rule: these are `UpstreamTransient`, everything else is
    /// `UpstreamPermanent`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::from_status_with_retry_after(status, message, None)
    }

    pub fn from_status_with_retry_after(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = message.into();
        if DEFAULT_RETRYABLE_STATUS_CODES.contains(&status) {
            PipelineError::UpstreamTransient {
                status,
                message,
                retry_after,
            }
        } else {
            PipelineError::UpstreamPermanent { status, message }
        }
    }

    /// C1: whether the pipeline should consider retrying this error at all,
    /// ignoring attempt counts (that's the retry policy's job).
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::UpstreamTransient { .. } => true,
            PipelineError::Http(e) => is_retryable_reqwest_error(e),
            _ => false,
        }
    }

    /// C1: the HTTP status code this error carries, or 0 if none.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::UpstreamTransient { status, .. } => *status,
            PipelineError::UpstreamPermanent { status, .. } => *status,
            PipelineError::Http(e) => e.status().map(|s| s.as_u16()).unwrap_or(0),
            _ => 0,
        }
    }

    /// The server-dictated `Retry-After` delay, if the upstream response carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::UpstreamTransient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Connection/timeout failures and 429/5xx responses are retryable; other
/// reqwest errors are not.
pub fn is_retryable_reqwest_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    if let Some(status) = err.status() {
        return DEFAULT_RETRYABLE_STATUS_CODES.contains(&status.as_u16());
    }
    err.is_request()
}

/// C1: walks the `source()` chain looking for a tagged retryable error.
pub fn is_retryable_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(pe) = e.downcast_ref::<PipelineError>() {
            return pe.is_retryable();
        }
        current = e.source();
    }
    false
}

/// C1: walks the `source()` chain looking for a tagged status code.
pub fn get_status_code(err: &(dyn StdError + 'static)) -> u16 {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(pe) = e.downcast_ref::<PipelineError>() {
            return pe.status_code();
        }
        current = e.source();
    }
    0
}

/// Structured diagnostic context attached to a request at ingress and
/// mutated through the chain (C4/C9).
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub start: Option<Instant>,
    pub duration: Option<Duration>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub operation: Option<String>,
    pub request_snapshot: Option<Snapshot>,
    pub response_snapshot: Option<Snapshot>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            timestamp: Some(Utc::now()),
            start: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_request_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.request_snapshot = Some(snapshot);
        self
    }

    pub fn with_response_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.response_snapshot = Some(snapshot);
        self
    }

    /// Computes and stores `duration = now - start`, returning it.
    pub fn mark_duration(&mut self) -> Duration {
        let duration = self
            .start
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.duration = Some(duration);
        duration
    }
}

/// Wraps a cause with an [`ErrorContext`]. `Display` renders the short,
/// single-line form used for causation checks; [`RichError::format_report`]
/// renders the multi-section diagnostic report. Secrets never appear in
/// either, since both are built from already-masked snapshots.
#[derive(Debug)]
pub struct RichError {
    pub cause: PipelineError,
    pub context: ErrorContext,
}

impl RichError {
    pub fn new(cause: PipelineError, context: ErrorContext) -> Self {
        Self { cause, context }
    }

    /// Multi-section textual report: `Error:`, `Context:`, `Request:`, `Response:`.
    pub fn format_report(&self) -> String {
        let mut report = format!("Error: {}\n", self.cause);
        report.push_str("Context:\n");
        if let Some(id) = &self.context.request_id {
            report.push_str(&format!("  request_id: {id}\n"));
        }
        if let Some(id) = &self.context.correlation_id {
            report.push_str(&format!("  correlation_id: {id}\n"));
        }
        if let Some(provider) = &self.context.provider {
            report.push_str(&format!("  provider: {provider}\n"));
        }
        if let Some(model) = &self.context.model {
            report.push_str(&format!("  model: {model}\n"));
        }
        if let Some(op) = &self.context.operation {
            report.push_str(&format!("  operation: {op}\n"));
        }
        if let Some(duration) = self.context.duration {
            report.push_str(&format!("  duration: {duration:?}\n"));
        }
        if let Some(snap) = &self.context.request_snapshot {
            report.push_str(&format!(
                "Request:\n  {} {}\n  body: {}{}\n",
                snap.method_or_status,
                snap.url,
                snap.body,
                if snap.body_truncated { " (truncated)" } else { "" }
            ));
        }
        if let Some(snap) = &self.context.response_snapshot {
            report.push_str(&format!(
                "Response:\n  status: {}\n  body: {}{}\n",
                snap.method_or_status,
                snap.body,
                if snap.body_truncated { " (truncated)" } else { "" }
            ));
        }
        report
    }
}

impl std::fmt::Display for RichError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl StdError for RichError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.cause)
    }
}

/// Either a bare [`PipelineError`] (no [`ErrorContext`] had been stashed when
/// the failure occurred) or one enriched into a [`RichError`]. Lets
/// [`enrich_error`] honor its "no context in, error unchanged" branch without
/// fabricating an empty context just to satisfy a single return type.
#[derive(Debug)]
pub enum EnrichedError {
    Plain(PipelineError),
    Rich(RichError),
}

impl std::fmt::Display for EnrichedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichedError::Plain(err) => write!(f, "{err}"),
            EnrichedError::Rich(err) => write!(f, "{err}"),
        }
    }
}

impl StdError for EnrichedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            EnrichedError::Plain(err) => err.source(),
            EnrichedError::Rich(err) => Some(err),
        }
    }
}

/// C9's `enrich_error`: wraps `err` in a [`RichError`] carrying `context` if
/// one was stashed, otherwise returns `err` unchanged.
pub fn enrich_error(context: Option<ErrorContext>, err: PipelineError) -> EnrichedError {
    match context {
        Some(context) => EnrichedError::Rich(RichError::new(err, context)),
        None => EnrichedError::Plain(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_429_is_retryable() {
        let err = PipelineError::from_status(429, "rate limited");
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn upstream_400_is_not_retryable() {
        let err = PipelineError::from_status(400, "bad request");
        assert!(!err.is_retryable());
    }

    #[test]
    fn rich_error_report_has_all_sections() {
        let context = ErrorContext::new()
            .with_request_id("req-1")
            .with_provider("bedrock");
        let rich = RichError::new(PipelineError::from_status(503, "boom"), context);
        let report = rich.format_report();
        assert!(report.contains("Error:"));
        assert!(report.contains("Context:"));
        assert!(report.contains("req-1"));
    }

    #[test]
    fn rich_error_display_is_single_line() {
        let rich = RichError::new(
            PipelineError::from_status(503, "boom"),
            ErrorContext::new(),
        );
        assert_eq!(rich.to_string().lines().count(), 1);
    }

    #[test]
    fn enrich_error_without_context_passes_through_unchanged() {
        let err = PipelineError::from_status(503, "boom");
        match enrich_error(None, err) {
            EnrichedError::Plain(err) => assert_eq!(err.status_code(), 503),
            EnrichedError::Rich(_) => panic!("no context was stashed, expected Plain"),
        }
    }

    #[test]
    fn enrich_error_with_context_wraps_in_rich_error() {
        let context = ErrorContext::new().with_request_id("req-9");
        let err = PipelineError::from_status(503, "boom");
        match enrich_error(Some(context), err) {
            EnrichedError::Rich(rich) => {
                assert_eq!(rich.context.request_id.as_deref(), Some("req-9"));
            }
            EnrichedError::Plain(_) => panic!("context was stashed, expected Rich"),
        }
    }
}
