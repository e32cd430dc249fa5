//! Paper summaries: a short free-text summary and a structured breakdown,
//! requested concurrently.

use paperscope_common::Paper;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LlmError;
use crate::pipeline::StructuredPipeline;
use crate::prompt::{simple_summary_prompt, structured_summary_prompt, PromptRequest};
use crate::schema;

pub const SIMPLE_SUMMARY_TEMPERATURE: f32 = 0.5;
pub const STRUCTURED_SUMMARY_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub keywords: Vec<String>,
    pub what_they_did: String,
    pub background: String,
    pub method: String,
    pub results: String,
    pub conclusion: String,
    pub importance_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    /// `None` when the structured request failed; the simple summary still stands.
    pub structured: Option<StructuredSummary>,
}

/// Summarise `paper` both ways at once.
///
/// A failed simple summary fails the call. A failed structured summary is
/// logged and reported as `structured: None`.
pub async fn summarize(pipeline: &StructuredPipeline, paper: &Paper) -> Result<SummaryResult, LlmError> {
    let abstract_text = paper.abstract_or_empty();

    let simple = PromptRequest::new(simple_summary_prompt(&paper.title, abstract_text), "")
        .with_temperature(SIMPLE_SUMMARY_TEMPERATURE);
    let structured = PromptRequest::new(structured_summary_prompt(&paper.title, abstract_text), "")
        .with_schema(schema::structured_summary())
        .with_temperature(STRUCTURED_SUMMARY_TEMPERATURE);

    let (summary, structured) = tokio::join!(
        pipeline.request_text(&simple),
        pipeline.request_structured::<StructuredSummary>(&structured),
    );

    let summary = summary?;
    let structured = match structured {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(paper_id = %paper.paper_id, kind = e.kind(), error = %e, "Structured summary unavailable");
            None
        }
    };

    info!(paper_id = %paper.paper_id, structured = structured.is_some(), "Summary ready");
    Ok(SummaryResult { summary, structured })
}
