//! Reasoning engine trait: the abstraction over local language models.
//!
//! An engine receives a system prompt and a user prompt and returns free
//! text. Structured action directives inside that text are parsed by the
//! reasoning dispatcher, not by the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A single request to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    /// The model to use (e.g., "gpt-oss:20b", "qwen2.5:0.5b")
    pub model: String,

    /// Persona, action schema and assembled context
    pub system: String,

    /// The triggering event rendered as text
    pub prompt: String,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.5
}

/// The core ReasoningEngine trait.
///
/// Calls must be free of side effects so the dispatcher can retry them with
/// identical input.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// A human-readable engine name (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a request and get the complete response text.
    async fn complete(&self, request: ReasoningRequest) -> std::result::Result<String, EngineError>;

    /// Like [`complete`](Self::complete), handing text to `on_chunk` as it
    /// is generated. Returns the full text. Engines that cannot stream hand
    /// over the whole response at once.
    async fn complete_streaming(
        &self,
        request: ReasoningRequest,
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> std::result::Result<String, EngineError> {
        let text = self.complete(request).await?;
        on_chunk(&text);
        Ok(text)
    }

    /// Health check: can we reach the engine?
    async fn health_check(&self) -> std::result::Result<bool, EngineError> {
        Ok(true)
    }
}
