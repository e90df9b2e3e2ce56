//! Vertex AI transformation middleware (C11) and OAuth2 token provider.
//!
//! Grounded on `providers::vertex`'s `AuthMode`/token-cache pattern
//! (`google_cloud_auth::project::Config` + `DefaultTokenSourceProvider`,
//! cached behind a lock with a refresh buffer) and its regional base-URL
//! construction, simplified to this crate's scope: a header/URL rewrite
//! plus model-id mapping and region gating, not a body-format translation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::context::Context;
use crate::error::PipelineError;
use crate::middleware::{Middleware, MiddlewareError};
use crate::request::{Request, Response};

const VERTEX_AI_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_REFRESH_BUFFER_SECS: u64 = 300;

/// How the bearer token used to authenticate to Vertex is obtained.
#[derive(Clone)]
pub enum VertexAuthMode {
    /// A static, already-valid bearer token. Never refreshed.
    BearerToken(String),
    /// A service account key, inline JSON or a path to one, exchanged for an
    /// OAuth2 token scoped to [`VERTEX_AI_SCOPE`].
    ServiceAccount { key_json_or_path: String },
    /// Credentials discovered from the ambient environment
    /// (`GOOGLE_APPLICATION_CREDENTIALS`, gcloud config, GCE/GKE metadata).
    ApplicationDefault,
}

/// Per-region availability of mapped model ids. `default_when_unknown`
/// controls whether a region absent from the map is treated as permissive
/// (pass) or restrictive (reject) — this crate defaults to permissive,
/// matching the specification's "Unknown region ⇒ pass" rule.
#[derive(Debug, Clone)]
pub struct RegionAvailability {
    pub available: HashMap<String, Vec<String>>,
    pub default_when_unknown: bool,
}

impl Default for RegionAvailability {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionAvailability {
    pub fn new() -> Self {
        Self {
            available: HashMap::new(),
            default_when_unknown: true,
        }
    }

    /// `Ok(())` if `model` may be used in `region`; `Err` naming the regions
    /// where it is available otherwise.
    fn check(&self, region: &str, model: &str) -> Result<(), PipelineError> {
        match self.available.get(region) {
            Some(models) if !models.contains(&model.to_string()) => {
                let available_in: Vec<&str> = self
                    .available
                    .iter()
                    .filter(|(_, models)| models.iter().any(|m| m == model))
                    .map(|(region, _)| region.as_str())
                    .collect();
                Err(PipelineError::ModelNotAvailable(format!(
                    "model not available in region, available in: {}",
                    available_in.join(", ")
                )))
            }
            Some(_) => Ok(()),
            None if self.default_when_unknown => Ok(()),
            None => Err(PipelineError::ModelNotAvailable(format!(
                "no model availability configured for region {region}"
            ))),
        }
    }
}

pub struct VertexConfig {
    pub project: String,
    pub region: String,
    pub endpoint_override: Option<String>,
    pub model_mapping: HashMap<String, String>,
    pub region_availability: RegionAvailability,
}

impl VertexConfig {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            endpoint_override: None,
            model_mapping: HashMap::new(),
            region_availability: RegionAvailability::new(),
        }
    }

    pub fn with_model_mapping(mut self, anthropic_id: impl Into<String>, vertex_id: impl Into<String>) -> Self {
        self.model_mapping.insert(anthropic_id.into(), vertex_id.into());
        self
    }

    fn endpoint(&self) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.region))
    }

    /// Maps an Anthropic model id to its Vertex counterpart, falling back to
    /// the `-YYYYMMDD` → `@YYYYMMDD` heuristic when no explicit mapping
    /// exists.
    fn map_model(&self, anthropic_model: &str) -> String {
        if let Some(mapped) = self.model_mapping.get(anthropic_model) {
            return mapped.clone();
        }
        if let Some(pos) = anthropic_model.rfind('-') {
            let (prefix, suffix) = anthropic_model.split_at(pos);
            let date = &suffix[1..];
            if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) {
                return format!("{prefix}@{date}");
            }
        }
        anthropic_model.to_string()
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Caches a bearer token behind a lock with a 5-minute refresh buffer,
/// mirroring this codebase's other token/credential caches.
pub struct VertexTokenProvider {
    auth_mode: VertexAuthMode,
    cached: RwLock<Option<CachedToken>>,
}

impl VertexTokenProvider {
    pub fn new(auth_mode: VertexAuthMode) -> Self {
        Self {
            auth_mode,
            cached: RwLock::new(None),
        }
    }

    fn is_fresh(cached: &CachedToken) -> bool {
        cached.expires_at > Instant::now() + Duration::from_secs(TOKEN_REFRESH_BUFFER_SECS)
    }

    pub async fn get_token(&self) -> Result<String, PipelineError> {
        if let VertexAuthMode::BearerToken(token) = &self.auth_mode {
            return Ok(token.clone());
        }

        if let Some(cached) = self.cached.read().await.as_ref()
            && Self::is_fresh(cached)
        {
            return Ok(cached.token.clone());
        }

        let token = self.fetch_token().await?;
        *self.cached.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<String, PipelineError> {
        let config = google_cloud_auth::project::Config::default().with_scopes(&[VERTEX_AI_SCOPE]);

        let provider = match &self.auth_mode {
            VertexAuthMode::BearerToken(token) => return Ok(token.clone()),
            VertexAuthMode::ApplicationDefault => {
                google_cloud_auth::token::DefaultTokenSourceProvider::new(config)
                    .await
                    .map_err(|e| PipelineError::AuthFailure(format!("failed to create Vertex token source: {e}")))?
            }
            VertexAuthMode::ServiceAccount { key_json_or_path } => {
                let key_json = if std::path::Path::new(key_json_or_path).exists() {
                    tokio::fs::read_to_string(key_json_or_path).await.map_err(|e| {
                        PipelineError::AuthFailure(format!("failed to read service account key: {e}"))
                    })?
                } else {
                    key_json_or_path.clone()
                };
                let creds: google_cloud_auth::credentials::CredentialsFile =
                    serde_json::from_str(&key_json).map_err(|e| {
                        PipelineError::AuthFailure(format!("invalid service account JSON: {e}"))
                    })?;
                google_cloud_auth::token::DefaultTokenSourceProvider::new_with_credentials(
                    config,
                    Box::new(creds),
                )
                .await
                .map_err(|e| PipelineError::AuthFailure(format!("failed to create Vertex token source: {e}")))?
            }
        };

        use google_cloud_token::TokenSourceProvider;
        provider
            .token_source()
            .token()
            .await
            .map_err(|e| PipelineError::AuthFailure(format!("failed to obtain Vertex token: {e}")))
    }
}

pub struct VertexMiddleware {
    config: VertexConfig,
    tokens: VertexTokenProvider,
}

impl VertexMiddleware {
    pub fn new(config: VertexConfig, auth_mode: VertexAuthMode) -> Self {
        Self {
            config,
            tokens: VertexTokenProvider::new(auth_mode),
        }
    }

    fn applies_to(req: &Request) -> bool {
        req.url.path().contains("/v1/messages")
    }
}

#[async_trait]
impl Middleware for VertexMiddleware {
    fn name(&self) -> &str {
        "vertex"
    }

    async fn on_request(
        &self,
        mut ctx: Context,
        req: Request,
    ) -> Result<(Context, Request), MiddlewareError> {
        if !Self::applies_to(&req) {
            return Ok((ctx, req));
        }

        let mut body: Value = serde_json::from_slice(&req.body).map_err(|e| {
            (ctx.clone(), PipelineError::BadRequestShape(format!("invalid JSON body: {e}")))
        })?;

        let anthropic_model = body
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| (ctx.clone(), PipelineError::BadRequestShape("missing `model` field".into())))?
            .to_string();

        let mapped_model = self.config.map_model(&anthropic_model);

        self.config
            .region_availability
            .check(&self.config.region, &mapped_model)
            .map_err(|e| (ctx.clone(), e))?;

        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
        }
        let new_body = serde_json::to_vec(&body).map_err(|e| {
            (ctx.clone(), PipelineError::BadRequestShape(format!("failed to re-serialize body: {e}")))
        })?;

        let url_str = format!(
            "{}/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:streamRawPredict",
            self.config.endpoint(),
            self.config.project,
            self.config.region,
            mapped_model
        );
        let url = url::Url::parse(&url_str).map_err(|e| {
            (ctx.clone(), PipelineError::InvalidConfig(format!("invalid Vertex URL: {e}")))
        })?;

        let mut new_req = Request::new(req.method, url).with_body(new_body);
        for (name, value) in req.headers.iter() {
            let lower = name.as_str().to_ascii_lowercase();
            if lower == "x-api-key" || lower.starts_with("anthropic-") {
                continue;
            }
            new_req.headers.insert(name.clone(), value.clone());
        }
        new_req = new_req.with_header("content-type", "application/json");

        let token = self.tokens.get_token().await.map_err(|e| (ctx.clone(), e))?;
        new_req = new_req.with_header("authorization", &format!("Bearer {token}"));

        ctx.provider = Some("vertex".to_string());
        ctx.original_model = Some(anthropic_model);

        Ok((ctx, new_req))
    }

    async fn on_response(
        &self,
        ctx: Context,
        req: &Request,
        resp: Response,
    ) -> Result<(Context, Response), MiddlewareError> {
        if req
            .url
            .host_str()
            .map(|h| !h.contains("aiplatform.googleapis.com"))
            .unwrap_or(true)
        {
            return Ok((ctx, resp));
        }

        let content_type = resp.content_type().unwrap_or_default();
        if content_type.contains("text/event-stream") || content_type.contains("application/x-ndjson") {
            return Ok((ctx, resp));
        }

        let Some(original_model) = ctx.original_model.clone() else {
            return Ok((ctx, resp));
        };

        let mut body: Value = match serde_json::from_slice(&resp.body) {
            Ok(v) => v,
            Err(_) => return Ok((ctx, resp)),
        };
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::String(original_model));
        }
        let new_body = serde_json::to_vec(&body).map_err(|e| {
            (ctx.clone(), PipelineError::BadRequestShape(format!("failed to re-serialize response body: {e}")))
        })?;

        Ok((ctx, resp.with_body(new_body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use url::Url;

    fn middleware() -> VertexMiddleware {
        let config = VertexConfig::new("my-project", "us-central1").with_model_mapping(
            "claude-3-5-sonnet-20241022",
            "claude-3-5-sonnet-v2@20241022",
        );
        VertexMiddleware::new(config, VertexAuthMode::BearerToken("test-token".into()))
    }

    fn anthropic_request(model: &str) -> Request {
        Request::new(
            http::Method::POST,
            Url::parse("https://api.anthropic.com/v1/messages").unwrap(),
        )
        .with_header("x-api-key", "sk-ant-secret")
        .with_header("anthropic-version", "2023-06-01")
        .with_body(Bytes::from(format!(r#"{{"model":"{model}","messages":[]}}"#)))
    }

    #[tokio::test]
    async fn rewrites_url_and_maps_model() {
        let mw = middleware();
        let (ctx, req) = mw
            .on_request(Context::new(), anthropic_request("claude-3-5-sonnet-20241022"))
            .await
            .unwrap();

        assert_eq!(req.url.host_str(), Some("us-central1-aiplatform.googleapis.com"));
        assert!(req.url.path().contains("claude-3-5-sonnet-v2@20241022"));
        assert!(req.header_str("x-api-key").is_none());
        assert_eq!(req.header_str("authorization"), Some("Bearer test-token"));
        assert_eq!(ctx.provider.as_deref(), Some("vertex"));
        assert_eq!(ctx.original_model.as_deref(), Some("claude-3-5-sonnet-20241022"));
    }

    #[tokio::test]
    async fn heuristic_date_suffix_mapping() {
        let mw = middleware();
        let (_ctx, req) = mw
            .on_request(Context::new(), anthropic_request("claude-3-opus-20240229"))
            .await
            .unwrap();
        assert!(req.url.path().contains("claude-3-opus@20240229"));
    }

    #[tokio::test]
    async fn region_gate_rejects_unavailable_model() {
        let mut config = VertexConfig::new("my-project", "us-central1");
        config
            .region_availability
            .available
            .insert("us-central1".to_string(), vec!["other-model".to_string()]);
        config.region_availability.default_when_unknown = true;
        let mw = VertexMiddleware::new(config, VertexAuthMode::BearerToken("test-token".into()));

        let err = mw
            .on_request(Context::new(), anthropic_request("claude-3-opus-20240229"))
            .await
            .unwrap_err();
        assert!(matches!(err.1, PipelineError::ModelNotAvailable(_)));
    }

    #[tokio::test]
    async fn response_phase_restores_original_model() {
        let mw = middleware();
        let (ctx, req) = mw
            .on_request(Context::new(), anthropic_request("claude-3-5-sonnet-20241022"))
            .await
            .unwrap();
        let resp = Response::new(http::StatusCode::OK)
            .with_body(Bytes::from_static(br#"{"id":"abc","content":[]}"#));
        let (_ctx, resp) = mw.on_response(ctx, &req, resp).await.unwrap();
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["model"], Value::String("claude-3-5-sonnet-20241022".into()));
    }
}
