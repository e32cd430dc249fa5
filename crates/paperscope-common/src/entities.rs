/// Paper records exchanged between the search collaborator and the LLM pipeline.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub paper_id: String,
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Paper {
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            abstract_text: None,
            url: None,
        }
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = Some(abstract_text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Abstract text, or an empty string when the source had none.
    pub fn abstract_or_empty(&self) -> &str {
        self.abstract_text.as_deref().unwrap_or("")
    }

    /// Title and abstract on separate lines, the subject text fed to analysis prompts.
    pub fn subject_text(&self) -> String {
        format!("{}\n{}", self.title, self.abstract_or_empty())
    }
}
