//! Prompt templates and the per-call prompt request.
//!
//! Templates are rendered once with the field list interpolated; building a
//! prompt is then plain concatenation of template and subject text.

use std::sync::LazyLock;

use crate::backend::clamp_temperature;
use crate::schema::SchemaDoc;

/// Candidate subject-matter fields offered to the model for classification.
pub const FIELD_LIST: &[&str] = &[
    "Computer Science", "Robotics", "Electronic Engineering", "Mechanical Engineering",
    "Materials Engineering", "Chemistry", "Physics", "Biology", "Medicine", "Pharmacy",
    "Environmental Science", "Agriculture", "Mathematics", "Earth Science", "Philosophy",
    "Psychology", "Sociology", "Education", "Law", "Political Science", "Economics",
    "Business Administration", "Linguistics", "Literature", "History", "Cultural Anthropology",
    "Media Studies", "Art Studies", "Civil Engineering", "Transportation Engineering",
    "Architectural Engineering",
];

const FIELD_NAMES_PLACEHOLDER: &str = "{FIELD_NAMES}";

const PAPER_ANALYSIS_RAW: &str = r#"
The following is information about a paper, given as
"title, abstract".

Read the paper carefully and capture its core contribution.

If the text contains a title, copy it verbatim, in its original language, into the `title` key.
If no title is given, write a short title that represents the text.

Output the following four items. The output must follow the JSON structure below exactly.
The output is used to search efficiently for related papers, so prefer words that work well as search terms.

---

1. **Fields (fields)**
   Give the most relevant field `score: 1.0`.
   Score every other field from 0.0 to 1.0 by how related it is.
   Output at least two fields.

Available fields:
{FIELD_NAMES}

---

2. **Research target (target)**
   One Japanese/English pair describing what the paper studies.
   Neither too abstract nor too specific.

---

3. **Approaches (approaches)**
   - methods: techniques or methodologies used (at least one ja/en pair)
   - factors: factors or variables examined (at least one ja/en pair)
   - metrics: evaluation metrics or outcomes (at least one ja/en pair)

---

4. **Search keywords (search_keywords)**
   At least three Japanese/English pairs that would find closely related papers.

### Output format (example):
```json
{
  "title": "Analysis of Saturation Flow Rate at Signalised Intersections",
  "fields": [
    { "name": "Civil Engineering", "score": 1.0 },
    { "name": "Transportation Engineering", "score": 0.9 }
  ],
  "labels": {
    "target": { "ja": "飽和交通流率", "en": "Saturation Flow Rate" },
    "approaches": {
      "methods": [ { "ja": "回帰分析", "en": "Regression Analysis" } ],
      "factors": [ { "ja": "大型車混入率", "en": "Heavy Vehicle Ratio" } ],
      "metrics": [ { "ja": "飽和交通流率", "en": "Saturation Flow Rate" } ]
    },
    "search_keywords": [
      { "ja": "飽和交通流率解析", "en": "Saturation Flow Rate Analysis" },
      { "ja": "土木工学 交通工学", "en": "Civil and Transportation Engineering" },
      { "ja": "大型車混入率 縦断勾配", "en": "Heavy Vehicle Ratio Vertical Gradient" }
    ]
  }
}
```
"#;

const PAPER_OVERVIEW_RAW: &str = r#"
The following is information about a paper, given as
"title, abstract".

Read the paper carefully and capture its core contribution.
Output the following three items. The output must follow the JSON structure below exactly.
The output helps a reader grasp the paper quickly, so extract concrete keywords about the
technique used, the problem addressed and the kind of paper.

---

1. **Fields (fields)**
   Give the most relevant field `score: 1.0` and score the others from 0.0 to 1.0.
   Output at least two fields.

Available fields:
{FIELD_NAMES}

---

2. **Research target (target)**
   One Japanese/English pair describing what the paper studies.

---

3. **Main keywords (main_keywords)**
   At least three Japanese/English pairs naming the techniques, the problem being solved,
   and the nature of the paper (survey, case study, field experiment, ...).

### Output format (example):
```json
{
  "fields": [
    { "name": "Civil Engineering", "score": 1.0 },
    { "name": "Transportation Engineering", "score": 0.9 }
  ],
  "labels": {
    "target": { "ja": "飽和交通流率解析", "en": "Saturation Flow Rate Analysis" },
    "main_keywords": [
      { "ja": "回帰分析", "en": "Regression Analysis" },
      { "ja": "渋滞緩和", "en": "Congestion Mitigation" },
      { "ja": "実証実験", "en": "Empirical Study" }
    ]
  }
}
```
"#;

/// Comma-separated field names, as interpolated into the analysis templates.
pub static FIELD_NAMES: LazyLock<String> = LazyLock::new(|| FIELD_LIST.join(", "));

pub static PAPER_ANALYSIS_TEMPLATE: LazyLock<String> =
    LazyLock::new(|| PAPER_ANALYSIS_RAW.replace(FIELD_NAMES_PLACEHOLDER, &FIELD_NAMES));

pub static PAPER_OVERVIEW_TEMPLATE: LazyLock<String> =
    LazyLock::new(|| PAPER_OVERVIEW_RAW.replace(FIELD_NAMES_PLACEHOLDER, &FIELD_NAMES));

pub const ASSISTANT_SYSTEM_PROMPT: &str =
    "You are a sincere and capable research assistant. Unless told otherwise, answer in Japanese.";

pub const PAPER_COMPARISON_INSTRUCTION: &str = concat!(
    "Below are the titles and abstracts of two papers: the user's own paper and a selected paper. ",
    "The user wants to know how the selected paper relates to their work. ",
    "First read the user's paper, then explain the selected paper briefly, like presentation slides: ",
    "short bullet-style phrases rather than polite prose. ",
    "Then explain how the selected paper relates to the user's paper, and finally ask whether the user ",
    "wants further explanation or advice. Papers are given as '(title),(abstract)'. ",
    "Use headings, simple diagrams or comparison tables where they help.",
);

pub const KEYWORD_SEARCH_INSTRUCTION: &str = concat!(
    "Below are the search keywords a user typed and the title and abstract of one result. ",
    "The user wants to understand this paper. Explain it briefly, like presentation slides: ",
    "short bullet-style phrases rather than polite prose. ",
    "The input is laid out as 'Search keywords: (keywords)\\nPaper: (title),(abstract)'. ",
    "The keywords carry what the user wants to know; use them to infer their intent. ",
    "Finish by asking whether a deeper explanation of any concept would help. ",
    "Do not repeat the title and abstract back.",
);

/// Instruction for the two-to-three sentence summary.
pub fn simple_summary_prompt(title: &str, abstract_text: &str) -> String {
    format!("{title}\n{abstract_text}\n\nSummarise the paper above in two or three sentences.")
}

/// Instruction for the structured summary; the answer must match the `structured_summary` schema.
pub fn structured_summary_prompt(title: &str, abstract_text: &str) -> String {
    format!(
        r#"Paper: {title}
{abstract_text}

Output in the following JSON format:
{{
  "keywords": [4-6 concrete techniques, methods or domains taken from the paper],
  "what_they_did": "one sentence: what they did, using what",
  "background": "research background and motivation",
  "method": "methods and approach",
  "results": "results and achievements",
  "conclusion": "conclusion and outlook",
  "importance_level": "medium"
}}

Example:
- keywords: ["BERT", "sentiment analysis", "natural language processing", "Twitter"]
- what_they_did: "Developed a sentiment analysis model for Twitter data using BERT"

Keywords must be concrete terms, not placeholders such as "keyword 1"."#
    )
}

/// `template + subject_text`. The template is trusted and already rendered.
pub fn build(template: &str, subject_text: &str) -> String {
    let mut prompt = String::with_capacity(template.len() + subject_text.len());
    prompt.push_str(template);
    prompt.push_str(subject_text);
    prompt
}

/// One structured-response call: what to ask, about what, against which schema.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    subject_text: String,
    instruction_template: String,
    schema: Option<SchemaDoc>,
    temperature: f32,
}

pub use crate::backend::DEFAULT_TEMPERATURE;

impl PromptRequest {
    pub fn new(instruction_template: impl Into<String>, subject_text: impl Into<String>) -> Self {
        Self {
            subject_text: subject_text.into(),
            instruction_template: instruction_template.into(),
            schema: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_schema(mut self, schema: &SchemaDoc) -> Self {
        self.schema = Some(schema.clone());
        self
    }

    /// Temperature is clamped into `[0.0, 1.0]`; NaN falls back to the default.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = clamp_temperature(temperature);
        self
    }

    pub fn subject_text(&self) -> &str {
        &self.subject_text
    }

    pub fn instruction_template(&self) -> &str {
        &self.instruction_template
    }

    pub fn schema(&self) -> Option<&SchemaDoc> {
        self.schema.as_ref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn prompt(&self) -> String {
        build(&self.instruction_template, &self.subject_text)
    }
}
