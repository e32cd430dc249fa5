//! Error taxonomy for the structured-response pipeline.
//!
//! Nothing here is retried. The caller decides whether to try again with a
//! different temperature or to show the failure.

use std::fmt;
use thiserror::Error;

/// Which JSON parse failed while decoding a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The text returned by the endpoint (the transport envelope).
    Json,
    /// The model's own answer extracted from the envelope.
    InnerJson,
}

impl DecodeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStage::Json      => "json",
            DecodeStage::InnerJson => "inner_json",
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Endpoint error [{status}]: {body}")]
    Endpoint { status: u16, body: String },

    #[error("Decode error at stage {stage}: {source}")]
    Decode {
        stage: DecodeStage,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Response violates schema {schema}: {}", .errors.join("; "))]
    SchemaViolation { schema: String, errors: Vec<String> },

    #[error("Schema {schema} failed to compile: {message}")]
    InvalidSchema { schema: String, message: String },

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl LlmError {
    /// Stable short name of the error kind, used in logs and request failures.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Transport(_)          => "transport",
            LlmError::Endpoint { .. }       => "endpoint",
            LlmError::Decode { .. }         => "decode",
            LlmError::SchemaViolation { .. } => "schema_violation",
            LlmError::InvalidSchema { .. }  => "invalid_schema",
            LlmError::UnknownSchema(_)      => "unknown_schema",
            LlmError::Client(_)             => "client",
        }
    }

    /// Text that failed to decode, or the endpoint's error body.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            LlmError::Decode { raw, .. }    => Some(raw),
            LlmError::Endpoint { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Operator-facing description: kind, message and, when available, the raw text.
    pub fn diagnostic(&self) -> String {
        match self.raw_text() {
            Some(raw) if !raw.is_empty() => format!("[{}] {}\n--- raw ---\n{}", self.kind(), self, raw),
            _ => format!("[{}] {}", self.kind(), self),
        }
    }

    pub(crate) fn decode(stage: DecodeStage, raw: impl Into<String>, source: serde_json::Error) -> Self {
        LlmError::Decode { stage, raw: raw.into(), source }
    }
}
