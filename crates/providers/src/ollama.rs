//! Ollama engine: local models served by `ollama serve`.
//!
//! Uses the native `/api/chat` endpoint. `complete` asks for one JSON
//! response; `complete_streaming` reads the newline-delimited chunks Ollama
//! sends with `stream: true`. The engine keeps no conversation state, so
//! every call is a pure function of the request.

use async_trait::async_trait;
use hearth_core::error::EngineError;
use hearth_core::reasoning::{ReasoningEngine, ReasoningRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub struct OllamaEngine {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Self::client(Duration::from_secs(120)),
        }
    }

    /// Transport-level timeout. The dispatcher enforces its own per-attempt
    /// bound on top of this.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Self::client(timeout);
        self
    }

    fn client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_chat_request(request: &ReasoningRequest, stream: bool) -> ChatRequest<'_> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &request.model,
            messages,
            stream,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }

    /// Models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// POST a chat request; non-200 answers become `Api` errors.
async fn send_chat(
    client: &reqwest::Client,
    url: &str,
    body: &ChatRequest<'_>,
) -> Result<reqwest::Response, EngineError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(map_transport_error)?;

    let status = response.status().as_u16();
    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Ollama returned error");
        return Err(EngineError::Api {
            status_code: status,
            message: error_body,
        });
    }
    Ok(response)
}

/// Decode one line of a streamed response. Blank lines yield `None`.
fn decode_stream_line(line: &[u8]) -> Result<Option<StreamChunk>, EngineError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chunk: StreamChunk = serde_json::from_str(line)
        .map_err(|e| EngineError::Network(format!("Failed to read stream: {e}")))?;
    if let Some(error) = &chunk.error {
        return Err(EngineError::Network(format!("Ollama stream error: {error}")));
    }
    Ok(Some(chunk))
}

fn map_transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout(e.to_string())
    } else {
        EngineError::Network(e.to_string())
    }
}

#[async_trait]
impl ReasoningEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: ReasoningRequest) -> Result<String, EngineError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::to_chat_request(&request, false);

        debug!(model = %request.model, prompt_chars = request.prompt.len(), "Sending chat request");
        let response = send_chat(&self.client, &url, &body).await?;

        // Undecodable bodies are transport failures, so they are retried
        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Network(format!("Failed to read response: {e}")))?;

        debug!(
            model = %chat.model,
            eval_count = chat.eval_count.unwrap_or(0),
            "Chat response received"
        );
        Ok(chat.message.content)
    }

    async fn complete_streaming(
        &self,
        request: ReasoningRequest,
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<String, EngineError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::to_chat_request(&request, true);

        debug!(model = %request.model, prompt_chars = request.prompt.len(), "Sending streaming chat request");
        let mut response = send_chat(&self.client, &url, &body).await?;

        let mut text = String::new();
        let mut eval_count = None;
        let mut pending: Vec<u8> = Vec::new();
        let mut take = |chunk: StreamChunk, text: &mut String| {
            if let Some(message) = chunk.message
                && !message.content.is_empty()
            {
                on_chunk(&message.content);
                text.push_str(&message.content);
            }
            if chunk.eval_count.is_some() {
                eval_count = chunk.eval_count;
            }
        };

        while let Some(bytes) = response.chunk().await.map_err(map_transport_error)? {
            pending.extend_from_slice(&bytes);
            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                if let Some(chunk) = decode_stream_line(&line)? {
                    take(chunk, &mut text);
                }
            }
        }
        if let Some(chunk) = decode_stream_line(&pending)? {
            take(chunk, &mut text);
        }

        debug!(
            model = %request.model,
            eval_count = eval_count.unwrap_or(0),
            chars = text.len(),
            "Streamed chat response received"
        );
        Ok(text)
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response.status().is_success())
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: ChatResponseMessage,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// One line of a streamed `/api/chat` response.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
