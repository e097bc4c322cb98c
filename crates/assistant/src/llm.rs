//! Language model provider abstraction.
//!
//! `HttpProvider` speaks the OpenAI-compatible API (OpenAI itself and Ollama's
//! `/v1` surface) and the Anthropic messages API. Streaming is surfaced as a
//! channel of text deltas so the orchestrator never blocks on a full
//! completion.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use atrium_core::config::{LlmConfig, LlmProvider};

const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("provider is not configured: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }
}

/// Seam between the assistant and whichever model host is configured. The
/// streaming receiver yields text deltas in arrival order; the first error is
/// terminal for that turn.
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    fn supports_embeddings(&self) -> bool;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError>;
}

pub struct HttpProvider {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpProvider {
    pub fn new(config: LlmConfig) -> Result<Self, ProviderError> {
        if config.provider == LlmProvider::Disabled {
            return Err(ProviderError::Unavailable(
                "llm provider is disabled in configuration".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        let default = match self.config.provider {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
            LlmProvider::Ollama => "http://127.0.0.1:11434/v1",
            LlmProvider::Disabled => "",
        };
        self.config.base_url.as_deref().unwrap_or(default)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.provider, &self.config.api_key) {
            (LlmProvider::Anthropic, Some(key)) => request
                .header("x-api-key", key.expose_secret())
                .header("anthropic-version", "2023-06-01"),
            (_, Some(key)) => request.bearer_auth(key.expose_secret()),
            (_, None) => request,
        }
    }

    async fn error_for(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::Api { status, body }
    }
}

#[async_trait]
impl LanguageModelProvider for HttpProvider {
    fn supports_embeddings(&self) -> bool {
        self.config.supports_embeddings() && self.config.provider != LlmProvider::Anthropic
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let Some(model) = self.config.embedding_model.as_deref() else {
            return Err(ProviderError::Unavailable(
                "no embedding model configured".to_string(),
            ));
        };
        if self.config.provider == LlmProvider::Anthropic {
            return Err(ProviderError::Unavailable(
                "anthropic does not serve embeddings".to_string(),
            ));
        }

        let url = format!("{}/embeddings", self.base_url());
        let request = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "input": text }));
        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }

        let body: EmbeddingsResponse =
            response.json().await.map_err(|error| ProviderError::Decode(error.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| ProviderError::Decode("embeddings response had no data".to_string()))
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        let anthropic = self.config.provider == LlmProvider::Anthropic;

        let (url, body) = if anthropic {
            let (system, rest): (Vec<&ChatMessage>, Vec<&ChatMessage>) =
                messages.iter().partition(|message| message.role == "system");
            let system_text =
                system.iter().map(|message| message.content.as_str()).collect::<Vec<_>>().join("\n\n");
            (
                format!("{}/messages", self.base_url()),
                json!({
                    "model": self.config.chat_model,
                    "max_tokens": 4096,
                    "stream": true,
                    "system": system_text,
                    "messages": rest
                        .iter()
                        .map(|message| json!({"role": message.role, "content": message.content}))
                        .collect::<Vec<_>>(),
                }),
            )
        } else {
            (
                format!("{}/chat/completions", self.base_url()),
                json!({
                    "model": self.config.chat_model,
                    "stream": true,
                    "messages": messages
                        .iter()
                        .map(|message| json!({"role": message.role, "content": message.content}))
                        .collect::<Vec<_>>(),
                }),
            )
        };

        let request = self.client.post(&url).json(&body);
        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }

        let (sender, receiver) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump_sse(response, sender, anthropic));
        Ok(receiver)
    }
}

/// Reads the SSE body chunk by chunk, reassembles `data:` lines, and forwards
/// decoded text deltas. Stops silently once the receiver is dropped.
async fn pump_sse(
    mut response: reqwest::Response,
    sender: mpsc::Sender<Result<String, ProviderError>>,
    anthropic: bool,
) {
    let mut buffer = String::new();

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(error) => {
                let _ = sender.send(Err(ProviderError::Http(error))).await;
                return;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);

            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            if let Some(delta) = decode_delta(data, anthropic) {
                if !delta.is_empty() && sender.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn decode_delta(data: &str, anthropic: bool) -> Option<String> {
    if anthropic {
        let event: AnthropicEvent = serde_json::from_str(data).ok()?;
        if event.kind == "content_block_delta" {
            return event.delta.and_then(|delta| delta.text);
        }
        None
    } else {
        let event: OpenAiChunk = serde_json::from_str(data).ok()?;
        event.choices.into_iter().next().and_then(|choice| choice.delta.content)
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<AnthropicDelta>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

/// Stand-in used when no model host is configured. Every call reports
/// unavailability; turns still run and surface the condition as a stream
/// error instead of refusing to boot.
#[derive(Default)]
pub struct DisabledProvider;

#[async_trait]
impl LanguageModelProvider for DisabledProvider {
    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unavailable("llm provider is disabled in configuration".to_string()))
    }

    async fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        Err(ProviderError::Unavailable("llm provider is disabled in configuration".to_string()))
    }
}

/// Deterministic provider for tests: replays scripted chunks and answers
/// embeds with a fixed vector or a scripted failure.
pub struct ScriptedProvider {
    chunks: Vec<String>,
    embedding: Option<Vec<f32>>,
    fail_embeds: bool,
}

impl ScriptedProvider {
    pub fn streaming(chunks: Vec<String>) -> Self {
        Self { chunks, embedding: Some(vec![1.0, 0.0, 0.0]), fail_embeds: false }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn without_embeddings(mut self) -> Self {
        self.embedding = None;
        self
    }

    pub fn failing_embeds(mut self) -> Self {
        self.fail_embeds = true;
        self
    }
}

#[async_trait]
impl LanguageModelProvider for ScriptedProvider {
    fn supports_embeddings(&self) -> bool {
        self.embedding.is_some() || self.fail_embeds
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        if self.fail_embeds {
            return Err(ProviderError::Api { status: 503, body: "scripted failure".to_string() });
        }
        self.embedding
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("no embedding model configured".to_string()))
    }

    async fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        let (sender, receiver) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let chunks = self.chunks.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if sender.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_delta, ChatMessage, LanguageModelProvider, ScriptedProvider};

    #[test]
    fn openai_delta_decodes_content() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(decode_delta(data, false), Some("Hel".to_string()));
    }

    #[test]
    fn openai_delta_without_content_is_skipped() {
        let data = r#"{"choices":[{"delta":{}}]}"#;
        assert_eq!(decode_delta(data, false), None);
    }

    #[test]
    fn anthropic_delta_decodes_text() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(decode_delta(data, true), Some("Hi".to_string()));
    }

    #[test]
    fn anthropic_non_delta_events_are_skipped() {
        let data = r#"{"type":"message_start","delta":null}"#;
        assert_eq!(decode_delta(data, true), None);
    }

    #[tokio::test]
    async fn scripted_provider_replays_chunks_in_order() {
        let provider = ScriptedProvider::streaming(vec!["a".to_string(), "b".to_string()]);
        let mut receiver = provider
            .stream_chat(vec![ChatMessage::new("user", "hi")])
            .await
            .expect("stream");

        let mut collected = String::new();
        while let Some(delta) = receiver.recv().await {
            collected.push_str(&delta.expect("chunk"));
        }
        assert_eq!(collected, "ab");
    }
}
