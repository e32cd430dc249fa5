//! paperscope-llm — structured responses from a local Ollama-compatible model.
//!
//! A prompt goes out as one request, the answer comes back as JSON inside a
//! transport envelope, gets its markdown fences stripped, is parsed twice and
//! validated against a JSON Schema before being mapped into typed data.

pub mod analysis;
pub mod audit;
pub mod backend;
pub mod chat;
pub mod clean;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod stream;
pub mod summary;

pub use analysis::{analyze_paper, overview_paper, AnalysisOptions, FieldScore, Label, PaperAnalysis, PaperOverview};
pub use backend::{ChatBackend, ChatRequest, Envelope, Message, ModelInfo, OllamaClient, ResponseFormat, Role};
pub use chat::{ChatEntry, ChatMode, ChatRole, PaperChat};
pub use error::{DecodeStage, LlmError};
pub use pipeline::StructuredPipeline;
pub use prompt::PromptRequest;
pub use schema::{SchemaDoc, SchemaRegistry};
pub use stream::{ChatStream, StreamAccumulator, StreamState};
pub use summary::{summarize, StructuredSummary, SummaryResult};
