//! Bounded, masked capture of an HTTP request or response for diagnostics.
//!
//! A [`Snapshot`] never holds the original, unmasked bytes: masking happens
//! at capture time, before the snapshot escapes into an [`crate::error::ErrorContext`]
//! or a log line.

use std::sync::Arc;

use crate::masking::CredentialMasker;
use crate::request::{Request, Response};

/// `max_body_size` (default 4096 bytes), header/body inclusion toggles, and
/// the masker used to scrub captured bytes.
#[derive(Clone)]
pub struct SnapshotConfig {
    pub max_body_size: usize,
    pub include_headers: bool,
    pub include_body: bool,
    pub masker: Arc<CredentialMasker>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_body_size: 4096,
            include_headers: true,
            include_body: true,
            masker: Arc::new(CredentialMasker::default()),
        }
    }
}

/// A masked, bounded capture of a request or response. Reading the body at
/// capture time never consumes the original: the caller always retains its
/// own owned copy (`Request`/`Response` hold `Bytes`, which clone cheaply),
/// so "restore after read" is simply "snapshot from a clone".
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub method_or_status: String,
    pub url: String,
    pub headers: Vec<(String, Vec<String>)>,
    pub body: String,
    pub body_truncated: bool,
}

impl Snapshot {
    pub fn from_request(req: &Request, config: &SnapshotConfig) -> Self {
        let headers = if config.include_headers {
            config.masker.mask_headers(&req.headers)
        } else {
            Vec::new()
        };
        let (body, truncated) = if config.include_body {
            capture_body(&req.body, config)
        } else {
            (String::new(), false)
        };
        Self {
            method_or_status: req.method.to_string(),
            url: config.masker.mask_url(req.url.as_str()),
            headers,
            body,
            body_truncated: truncated,
        }
    }

    pub fn from_response(resp: &Response, config: &SnapshotConfig) -> Self {
        let headers = if config.include_headers {
            config.masker.mask_headers(&resp.headers)
        } else {
            Vec::new()
        };
        let (body, truncated) = if config.include_body {
            capture_body(&resp.body, config)
        } else {
            (String::new(), false)
        };
        Self {
            method_or_status: resp.status.as_u16().to_string(),
            url: String::new(),
            headers,
            body,
            body_truncated: truncated,
        }
    }
}

fn capture_body(body: &[u8], config: &SnapshotConfig) -> (String, bool) {
    let limit = config.max_body_size;
    let truncated = body.len() > limit;
    let slice = if truncated { &body[..limit] } else { body };
    let text = String::from_utf8_lossy(slice).into_owned();
    (config.masker.mask_string(&text), truncated)
}
