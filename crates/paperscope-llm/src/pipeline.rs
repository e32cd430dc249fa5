//! Prompt → single request → clean → decode.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::backend::{ChatBackend, ChatRequest, Message, ResponseFormat};
use crate::clean::clean;
use crate::decode::{decode, extract_text};
use crate::error::LlmError;
use crate::prompt::PromptRequest;

/// Runs one-shot prompts against a backend and turns the answer into typed data.
#[derive(Clone)]
pub struct StructuredPipeline {
    backend: Arc<dyn ChatBackend>,
}

impl StructuredPipeline {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    fn chat_request(request: &PromptRequest, format: Option<ResponseFormat>) -> ChatRequest {
        let chat = ChatRequest::new(vec![Message::user(request.prompt())])
            .with_temperature(request.temperature());
        match format {
            Some(format) => chat.with_format(format),
            None => chat,
        }
    }

    /// Ask for JSON output and decode it into `T`.
    ///
    /// With a schema, the schema is sent as the format constraint and the
    /// answer is validated against it; without one, any JSON is accepted.
    #[instrument(skip(self, request), fields(model = %self.backend.model_id()))]
    pub async fn request_structured<T: DeserializeOwned>(&self, request: &PromptRequest) -> Result<T, LlmError> {
        let format = match request.schema() {
            Some(schema) => ResponseFormat::Schema(schema.document().clone()),
            None => ResponseFormat::Json,
        };
        let raw = self.backend.send(&Self::chat_request(request, Some(format))).await?;

        let cleaned = clean(&raw);
        debug!(schema = request.schema().map(|s| s.name()), bytes = cleaned.len(), "Decoding structured response");

        decode(&cleaned, request.schema()).inspect_err(|e| {
            warn!(kind = e.kind(), error = %e, "Structured response rejected");
        })
    }

    /// Free-text answer, trimmed.
    #[instrument(skip(self, request), fields(model = %self.backend.model_id()))]
    pub async fn request_text(&self, request: &PromptRequest) -> Result<String, LlmError> {
        let raw = self.backend.send(&Self::chat_request(request, None)).await?;
        extract_text(&raw)
    }
}
