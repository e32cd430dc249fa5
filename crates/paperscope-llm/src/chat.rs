//! Conversational follow-up about one paper.
//!
//! The conversation opens with a hidden user turn carrying the paper and the
//! instruction for the chosen mode. Hidden turns go to the model but are not
//! part of the visible history.

use paperscope_common::Paper;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{ChatBackend, ChatRequest, Message, Role};
use crate::error::LlmError;
use crate::prompt::{ASSISTANT_SYSTEM_PROMPT, KEYWORD_SEARCH_INSTRUCTION, PAPER_COMPARISON_INSTRUCTION};
use crate::stream::ChatStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    HiddenUser,
    Assistant,
}

impl ChatRole {
    fn api_role(self) -> Role {
        match self {
            ChatRole::System                   => Role::System,
            ChatRole::User | ChatRole::HiddenUser => Role::User,
            ChatRole::Assistant                => Role::Assistant,
        }
    }

    pub fn is_visible(self) -> bool {
        matches!(self, ChatRole::User | ChatRole::Assistant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
}

/// How the paper was reached, which decides the opening instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMode {
    /// Compare the selected paper against the user's own paper.
    PaperComparison { user_paper: String },
    /// Explain a search hit in light of the keywords that found it.
    KeywordSearch { query: String },
}

impl ChatMode {
    pub fn initial_prompt(&self, paper: &Paper) -> String {
        let selected = format!("{}, {}", paper.title, paper.abstract_or_empty());
        match self {
            ChatMode::PaperComparison { user_paper } => format!(
                "{PAPER_COMPARISON_INSTRUCTION}\nUser paper: {user_paper}\n\"\"\"Selected paper\"\"\"\n{selected}"
            ),
            ChatMode::KeywordSearch { query } => format!(
                "{KEYWORD_SEARCH_INSTRUCTION}\nSearch keywords: {query}\nPaper: {selected}"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaperChat {
    system_prompt: String,
    history: Vec<ChatEntry>,
}

impl PaperChat {
    pub fn new() -> Self {
        Self::with_system_prompt(ASSISTANT_SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let history = vec![ChatEntry { role: ChatRole::System, content: system_prompt.clone() }];
        Self { system_prompt, history }
    }

    /// Start talking about `paper`: adds the hidden opening turn.
    pub fn open(&mut self, mode: &ChatMode, paper: &Paper) {
        debug!(paper_id = %paper.paper_id, ?mode, "Opening paper chat");
        self.push(ChatRole::HiddenUser, mode.initial_prompt(paper));
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(ChatRole::User, text.into());
    }

    pub fn record_reply(&mut self, text: impl Into<String>) {
        self.push(ChatRole::Assistant, text.into());
    }

    /// Back to just the system prompt.
    pub fn reset(&mut self) {
        self.history.clear();
        self.push(ChatRole::System, self.system_prompt.clone());
    }

    fn push(&mut self, role: ChatRole, content: String) {
        self.history.push(ChatEntry { role, content });
    }

    pub fn history(&self) -> &[ChatEntry] {
        &self.history
    }

    /// User and assistant turns only, in order.
    pub fn visible_history(&self) -> impl Iterator<Item = &ChatEntry> {
        self.history.iter().filter(|e| e.role.is_visible())
    }

    /// The full history in API form, hidden turns included.
    pub fn api_messages(&self) -> Vec<Message> {
        self.history
            .iter()
            .map(|e| Message { role: e.role.api_role(), content: e.content.clone() })
            .collect()
    }

    /// Stream the next assistant reply. The reply is not recorded.
    pub async fn stream_reply(&self, backend: &dyn ChatBackend, temperature: f32) -> Result<ChatStream, LlmError> {
        let request = ChatRequest::new(self.api_messages()).with_temperature(temperature);
        backend.stream(&request).await
    }

    /// Stream the next reply to completion and record it.
    pub async fn reply(&mut self, backend: &dyn ChatBackend, temperature: f32) -> Result<String, LlmError> {
        let text = self.stream_reply(backend, temperature).await?.collect_text().await?;
        self.record_reply(text.clone());
        Ok(text)
    }
}

impl Default for PaperChat {
    fn default() -> Self {
        Self::new()
    }
}
