//! Fallback virtual provider (C13): an ordered list of child providers
//! composed into one logical provider. Tries each child in turn until one
//! yields a stream; wraps that stream so every chunk carries
//! `fallback_provider` / `fallback_index` metadata.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::warn;

use crate::context::Context;
use crate::error::PipelineError;
use crate::provider::{ChatCompletionOptions, ChunkStream, Provider};

/// Best-effort metric sink. Emission errors are logged and discarded, never
/// propagated — a broken metrics pipe must not fail a chat completion.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn emit(&self, event: FallbackEvent);
}

#[derive(Debug, Clone)]
pub enum FallbackEvent {
    /// Emitted when the first successful provider wasn't index 0.
    ProviderSwitch {
        to_provider: String,
        to_index: usize,
    },
    /// Emitted once per failed attempt while searching for a working child.
    AttemptFailed { provider: String, index: usize },
    /// Emitted when every child failed.
    AllFailed { last_error: String },
}

pub struct FallbackProvider {
    name: String,
    providers: Vec<Arc<dyn Provider>>,
    events: Option<Arc<dyn EventSubscriber>>,
}

impl FallbackProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            events: None,
        }
    }

    pub fn with_event_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.events = Some(subscriber);
        self
    }

    /// Installs the resolved child provider list, in fallback order.
    pub fn set_providers(&mut self, providers: Vec<Arc<dyn Provider>>) {
        self.providers = providers;
    }

    async fn emit(&self, event: FallbackEvent) {
        if let Some(subscriber) = &self.events {
            subscriber.emit(event).await;
        }
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        "fallback"
    }

    async fn generate_chat_completion(
        &self,
        ctx: Context,
        opts: ChatCompletionOptions,
    ) -> Result<ChunkStream, PipelineError> {
        if self.providers.is_empty() {
            return Err(PipelineError::FallbackAllFailed {
                last: "no providers available".into(),
            });
        }

        let mut last_err: Option<PipelineError> = None;
        for (index, provider) in self.providers.iter().enumerate() {
            match provider.generate_chat_completion(ctx.clone(), opts.clone()).await {
                Ok(stream) => {
                    if index > 0 {
                        self.emit(FallbackEvent::ProviderSwitch {
                            to_provider: provider.name().to_string(),
                            to_index: index,
                        })
                        .await;
                    }
                    return Ok(wrap_stream(stream, provider.name().to_string(), index));
                }
                Err(err) => {
                    warn!(provider = provider.name(), index, %err, "fallback provider attempt failed");
                    self.emit(FallbackEvent::AttemptFailed {
                        provider: provider.name().to_string(),
                        index,
                    })
                    .await;
                    last_err = Some(err);
                }
            }
        }

        let message = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no providers available".to_string());
        self.emit(FallbackEvent::AllFailed {
            last_error: message.clone(),
        })
        .await;
        Err(PipelineError::FallbackAllFailed { last: message })
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.health_check().await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| PipelineError::FallbackAllFailed {
            last: "no providers configured".into(),
        }))
    }
}

fn wrap_stream(stream: ChunkStream, provider_name: String, index: usize) -> ChunkStream {
    Box::pin(stream.map(move |item| {
        item.map(|chunk| {
            chunk
                .with_metadata("fallback_provider", Value::String(provider_name.clone()))
                .with_metadata("fallback_index", Value::from(index))
        })
    }))
}
