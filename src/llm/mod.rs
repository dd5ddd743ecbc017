use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::LlmSettings;

/// One generation call: a system instruction, a user instruction, and
/// sampling parameters. Prompt assembly happens upstream; this crate only
/// transports the finished prompts.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Captures basic token usage metrics associated with a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
}

/// Successful generation result surfaced to callers.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub token_usage: TokenUsage,
}

/// Terminal failures at the transport boundary. These are the only errors
/// the grading core ever propagates; a response that arrives but cannot be
/// parsed is not an error, it is a low-confidence record.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to the model failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("input exceeds the model context window (status {status}): {body}")]
    ContextOverflow { status: u16, body: String },
    #[error("model call failed with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Capability of turning prompts into raw text. The grading engine only
/// depends on this trait; `OllamaClient` is the production implementation.
#[async_trait]
pub trait TextGeneration: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError>;
}

/// Client for a local Ollama instance.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model,
        })
    }

    /// Build a client from `OLLAMA_HOST` and related environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(LlmSettings::from_env())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// List the models the Ollama instance has pulled.
    pub async fn available_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }

    /// True when the Ollama instance is reachable.
    pub async fn ping(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl TextGeneration for OllamaClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        let mut messages = Vec::new();
        if !request.system_prompt.trim().is_empty() {
            messages.push(json!({ "role": "system", "content": request.system_prompt }));
        }
        messages.push(json!({ "role": "user", "content": request.user_prompt }));

        let payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if looks_like_context_overflow(&body) {
                return Err(GenerationError::ContextOverflow {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response.json().await?;
        let text = body
            .message
            .map(|message| message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        let prompt_tokens = body.prompt_eval_count.unwrap_or(0);
        let response_tokens = body.eval_count.unwrap_or(0);

        Ok(Generation {
            text,
            model: self.model.clone(),
            token_usage: TokenUsage {
                prompt_tokens,
                response_tokens,
                total_tokens: prompt_tokens + response_tokens,
            },
        })
    }
}

/// Ollama reports context-length problems through the error body rather than
/// a dedicated status code.
fn looks_like_context_overflow(body: &str) -> bool {
    let lowered = body.to_lowercase();
    ["context", "too long", "overflow", "exceed"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessagePayload>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ChatMessagePayload {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}
