//! Audit record for LLM calls.
//!
//! Only a hash of the output is kept; paper text never reaches the log.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub id: Uuid,
    pub model: String,
    pub envelope: String,
    pub streaming: bool,
    pub output_bytes: usize,
    pub output_hash: String,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl LlmCallRecord {
    pub fn new(model: &str, envelope: &str, streaming: bool, output: &str, latency_ms: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(output.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            model: model.to_string(),
            envelope: envelope.to_string(),
            streaming,
            output_bytes: output.len(),
            output_hash,
            latency_ms,
            called_at: Utc::now(),
        }
    }

    pub fn emit(&self) {
        tracing::debug!(
            call_id = %self.id,
            model = %self.model,
            envelope = %self.envelope,
            streaming = self.streaming,
            output_bytes = self.output_bytes,
            output_hash = %self.output_hash,
            latency_ms = self.latency_ms,
            "LLM call completed"
        );
    }
}

/// A call in flight. Becomes a record once its output is known.
#[derive(Debug, Clone)]
pub struct PendingCall {
    model: String,
    envelope: String,
    streaming: bool,
    started: Instant,
}

impl PendingCall {
    pub fn start(model: &str, envelope: &str, streaming: bool) -> Self {
        Self {
            model: model.to_string(),
            envelope: envelope.to_string(),
            streaming,
            started: Instant::now(),
        }
    }

    pub fn finish(self, output: &str) -> LlmCallRecord {
        let latency_ms = self.started.elapsed().as_millis() as u64;
        LlmCallRecord::new(&self.model, &self.envelope, self.streaming, output, latency_ms)
    }
}
