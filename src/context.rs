//! Ambient, request-scoped state carried through the middleware chain.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

use crate::error::ErrorContext;

/// Key-value bag threaded explicitly through the pipeline instead of relying
/// on dynamic ambient context (the source's "context bag" pattern, re-expressed
/// per the design notes as a typed struct rather than an untyped map).
#[derive(Debug, Clone)]
pub struct Context {
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub start_time: Option<Instant>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub retry_count: u32,
    pub metadata: HashMap<String, Value>,
    pub error_context: Option<ErrorContext>,
    /// The Anthropic-shaped model id a transformer rewrote away, stashed so
    /// the response phase can restore it.
    pub original_model: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            request_id: None,
            correlation_id: None,
            start_time: None,
            provider: None,
            model: None,
            retry_count: 0,
            metadata: HashMap::new(),
            error_context: None,
            original_model: None,
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}
