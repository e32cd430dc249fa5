//! Chat backend trait and the local-model HTTP client.
//!
//! One client covers every envelope style:
//!   Envelope::Chat:     POST /api/chat, answer in `message.content`
//!   Envelope::Generate: POST /api/generate, answer in `response`
//!   Envelope::OpenAi:   POST /v1/chat/completions (LM Studio and other
//!                       OpenAI-compatible servers), answer in
//!                       `choices[0].message.content`, streamed as SSE
//!
//! Each call is a single request. Nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use paperscope_common::OllamaConfig;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::audit::PendingCall;
use crate::error::{DecodeStage, LlmError};
use crate::stream::ChatStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Clamp into `[0.0, 1.0]`; NaN falls back to [`DEFAULT_TEMPERATURE`].
pub fn clamp_temperature(temperature: f32) -> f32 {
    if temperature.is_nan() {
        DEFAULT_TEMPERATURE
    } else {
        temperature.clamp(0.0, 1.0)
    }
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Generation-format constraint: free JSON or a specific schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Json,
    Schema(Value),
}

impl Serialize for ResponseFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResponseFormat::Json => serializer.serialize_str("json"),
            ResponseFormat::Schema(schema) => schema.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, temperature: DEFAULT_TEMPERATURE, format: None }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = clamp_temperature(temperature);
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Which endpoint, and therefore which response envelope, a client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Envelope {
    #[default]
    Chat,
    Generate,
    OpenAi,
}

impl Envelope {
    pub fn path(&self) -> &'static str {
        match self {
            Envelope::Chat     => "/api/chat",
            Envelope::Generate => "/api/generate",
            Envelope::OpenAi   => "/v1/chat/completions",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Envelope::Chat     => "chat",
            Envelope::Generate => "generate",
            Envelope::OpenAi   => "openai",
        }
    }

    /// Inverse of [`Envelope::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "chat"     => Some(Envelope::Chat),
            "generate" => Some(Envelope::Generate),
            "openai"   => Some(Envelope::OpenAi),
            _ => None,
        }
    }
}

/// An installed model as reported by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub digest: String,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One non-streaming request; returns the raw response body.
    async fn send(&self, request: &ChatRequest) -> Result<String, LlmError>;
    /// One streaming request; the returned stream yields the accumulated answer.
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, LlmError>;
    fn model_id(&self) -> &str;
    fn envelope(&self) -> Envelope;
}

// ── Wire bodies ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a ResponseFormat>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a ResponseFormat>,
}

#[derive(Serialize)]
struct OpenAiBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

/// OpenAI `response_format` for a format constraint.
fn openai_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Json => json!({ "type": "json_object" }),
        ResponseFormat::Schema(schema) => json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.get("title").and_then(Value::as_str).unwrap_or("response"),
                "schema": schema,
            }
        }),
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Split chat messages into a generate-style prompt and optional system text.
fn generate_prompt(messages: &[Message]) -> (String, Option<String>) {
    let join = |want_system: bool| {
        messages
            .iter()
            .filter(|m| (m.role == Role::System) == want_system)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let system = join(true);
    (join(false), if system.is_empty() { None } else { Some(system) })
}

async fn check_response_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "LLM endpoint returned an error status");
    Err(LlmError::Endpoint { status: status.as_u16(), body })
}

// ── Ollama ────────────────────────────────────────────────────────────────────

pub struct OllamaClient {
    config: OllamaConfig,
    envelope: Envelope,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;

        tracing::info!(base_url = %config.base_url, model = %config.model, "Ollama client initialized");

        Ok(Self {
            config: config.clone(),
            envelope: Envelope::Chat,
            timeout: Duration::from_secs(config.timeout_secs),
            client,
        })
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// POST the request body for this client's envelope. Non-streaming calls
    /// get the configured timeout; streams are bounded only by the connect timeout.
    async fn post(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let url = self.config.endpoint(self.envelope.path());
        debug!(url = %url, stream, messages = request.messages.len(), "LLM request");

        let mut builder = match self.envelope {
            Envelope::Chat => self.client.post(&url).json(&ChatBody {
                model: &self.config.model,
                messages: &request.messages,
                stream,
                temperature: request.temperature,
                format: request.format.as_ref(),
            }),
            Envelope::Generate => {
                let (prompt, system) = generate_prompt(&request.messages);
                self.client.post(&url).json(&GenerateBody {
                    model: &self.config.model,
                    prompt,
                    system,
                    stream,
                    temperature: request.temperature,
                    format: request.format.as_ref(),
                })
            }
            Envelope::OpenAi => self.client.post(&url).json(&OpenAiBody {
                model: &self.config.model,
                messages: &request.messages,
                stream,
                temperature: request.temperature,
                response_format: request.format.as_ref().map(openai_response_format),
            }),
        };
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let resp = builder.send().await?;
        check_response_status(resp).await
    }

    /// Installed models from `GET /api/tags`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let url = self.config.endpoint("/api/tags");
        let resp = self.client.get(&url).timeout(self.timeout).send().await?;
        let body = check_response_status(resp).await?.text().await?;
        let tags: TagsResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::decode(DecodeStage::Json, body.as_str(), e))?;
        Ok(tags.models)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    #[instrument(skip(self, request), fields(model = %self.config.model, envelope = self.envelope.as_str()))]
    async fn send(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let call = PendingCall::start(&self.config.model, self.envelope.as_str(), false);
        let body = self.post(request, false).await?.text().await?;
        call.finish(&body).emit();
        Ok(body)
    }

    #[instrument(skip(self, request), fields(model = %self.config.model, envelope = self.envelope.as_str()))]
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
        let call = PendingCall::start(&self.config.model, self.envelope.as_str(), true);
        let resp = self.post(request, true).await?;
        Ok(ChatStream::from_response(resp, self.envelope, call))
    }

    fn model_id(&self) -> &str { &self.config.model }
    fn envelope(&self) -> Envelope { self.envelope }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
