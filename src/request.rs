//! The wire-level request/response shapes middlewares rewrite.
//!
//! These are deliberately not `reqwest::Request`/`reqwest::Response` —
//! middlewares need to inspect and mutate a request's method, URL, headers,
//! and body independently before a single [`reqwest::Client`] call is made,
//! and to do so on a cheap, clonable value that a [`crate::snapshot::Snapshot`]
//! can capture without consuming it.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// An outbound HTTP request as it flows through the middleware chain.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `true` when the query string or JSON body requests streaming.
    pub fn wants_stream(&self) -> bool {
        if self
            .url
            .query_pairs()
            .any(|(k, v)| k == "stream" && v == "true")
        {
            return true;
        }
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("stream").and_then(|s| s.as_bool()))
            .unwrap_or(false)
    }
}

/// An inbound HTTP response as it flows back through the chain (reverse order).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_str("content-type")
    }
}
