//! The `Provider` external collaborator (§3 Data Model): minimal surface the
//! core consumes. Concrete model APIs' business semantics are out of scope;
//! this crate only needs enough of a provider to route to it and to fold it
//! into the fallback composition (C13).

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;

use crate::context::Context;
use crate::error::PipelineError;

/// Anthropic-shaped chat completion request body plus whether the caller
/// wants a streamed response.
#[derive(Debug, Clone)]
pub struct ChatCompletionOptions {
    pub body: Value,
    pub stream: bool,
}

/// One unit of a streamed chat completion. `metadata` carries
/// provider-bookkeeping fields a wrapping layer (the fallback provider)
/// stamps on, e.g. `fallback_provider` / `fallback_index`.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub data: Bytes,
    pub metadata: HashMap<String, Value>,
}

impl Chunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, PipelineError>> + Send>>;

/// Exposes at minimum a name, a type tag, chat-completion generation, and a
/// health check.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn provider_type(&self) -> &str;

    async fn generate_chat_completion(
        &self,
        ctx: Context,
        opts: ChatCompletionOptions,
    ) -> Result<ChunkStream, PipelineError>;

    /// `Ok(())` when healthy. Defaults to always-healthy for providers that
    /// don't have a cheaper reachability check.
    async fn health_check(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
