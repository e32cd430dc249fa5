//! Paper analysis and overview: field scores plus bilingual labels.
//!
//! The wire shape nests labels (`labels.approaches.methods`, ...); the Rust
//! types flatten them. Conversion goes through private wire structs so that
//! serialising a `PaperAnalysis` reproduces the wire shape exactly.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LlmError;
use crate::pipeline::StructuredPipeline;
use crate::prompt::{PromptRequest, DEFAULT_TEMPERATURE, PAPER_ANALYSIS_TEMPLATE, PAPER_OVERVIEW_TEMPLATE};
use crate::schema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldScore {
    pub name: String,
    pub score: f64,
}

/// A Japanese/English term pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub ja: String,
    pub en: String,
}

impl Label {
    pub fn new(ja: impl Into<String>, en: impl Into<String>) -> Self {
        Self { ja: ja.into(), en: en.into() }
    }
}

fn primary(fields: &[FieldScore]) -> Option<&FieldScore> {
    fields.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

// ── PaperAnalysis ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AnalysisWire", into = "AnalysisWire")]
pub struct PaperAnalysis {
    pub title: Option<String>,
    pub fields: Vec<FieldScore>,
    pub target: Label,
    pub methods: Vec<Label>,
    pub factors: Vec<Label>,
    pub metrics: Vec<Label>,
    pub search_keywords: Vec<Label>,
}

impl PaperAnalysis {
    /// The highest-scoring field.
    pub fn primary_field(&self) -> Option<&FieldScore> {
        primary(&self.fields)
    }

    /// English search keywords, for feeding back into a literature search.
    pub fn search_terms(&self) -> Vec<&str> {
        self.search_keywords.iter().map(|l| l.en.as_str()).collect()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct AnalysisWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    fields: Vec<FieldScore>,
    labels: AnalysisLabels,
}

#[derive(Clone, Serialize, Deserialize)]
struct AnalysisLabels {
    target: Label,
    approaches: Approaches,
    #[serde(default)]
    search_keywords: Vec<Label>,
}

#[derive(Clone, Serialize, Deserialize)]
struct Approaches {
    #[serde(default)]
    methods: Vec<Label>,
    #[serde(default)]
    factors: Vec<Label>,
    #[serde(default)]
    metrics: Vec<Label>,
}

impl From<AnalysisWire> for PaperAnalysis {
    fn from(wire: AnalysisWire) -> Self {
        let AnalysisLabels { target, approaches, search_keywords } = wire.labels;
        Self {
            title: wire.title,
            fields: wire.fields,
            target,
            methods: approaches.methods,
            factors: approaches.factors,
            metrics: approaches.metrics,
            search_keywords,
        }
    }
}

impl From<PaperAnalysis> for AnalysisWire {
    fn from(a: PaperAnalysis) -> Self {
        Self {
            title: a.title,
            fields: a.fields,
            labels: AnalysisLabels {
                target: a.target,
                approaches: Approaches { methods: a.methods, factors: a.factors, metrics: a.metrics },
                search_keywords: a.search_keywords,
            },
        }
    }
}

// ── PaperOverview ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "OverviewWire", into = "OverviewWire")]
pub struct PaperOverview {
    pub fields: Vec<FieldScore>,
    pub target: Label,
    pub main_keywords: Vec<Label>,
}

impl PaperOverview {
    pub fn primary_field(&self) -> Option<&FieldScore> {
        primary(&self.fields)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct OverviewWire {
    fields: Vec<FieldScore>,
    labels: OverviewLabels,
}

#[derive(Clone, Serialize, Deserialize)]
struct OverviewLabels {
    target: Label,
    main_keywords: Vec<Label>,
}

impl From<OverviewWire> for PaperOverview {
    fn from(wire: OverviewWire) -> Self {
        Self { fields: wire.fields, target: wire.labels.target, main_keywords: wire.labels.main_keywords }
    }
}

impl From<PaperOverview> for OverviewWire {
    fn from(o: PaperOverview) -> Self {
        Self {
            fields: o.fields,
            labels: OverviewLabels { target: o.target, main_keywords: o.main_keywords },
        }
    }
}

// ── Operations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisOptions {
    pub temperature: f32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self { temperature: DEFAULT_TEMPERATURE }
    }
}

/// Full analysis of a paper given as title and abstract text.
pub async fn analyze_paper(
    pipeline: &StructuredPipeline,
    subject_text: &str,
    options: AnalysisOptions,
) -> Result<PaperAnalysis, LlmError> {
    let request = PromptRequest::new(PAPER_ANALYSIS_TEMPLATE.as_str(), subject_text)
        .with_schema(schema::paper_analysis())
        .with_temperature(options.temperature);

    let analysis: PaperAnalysis = pipeline.request_structured(&request).await?;
    info!(
        title = ?analysis.title,
        primary_field = ?analysis.primary_field().map(|f| f.name.as_str()),
        keywords = analysis.search_keywords.len(),
        "Paper analysed"
    );
    Ok(analysis)
}

/// Lighter overview used when skimming search results.
pub async fn overview_paper(
    pipeline: &StructuredPipeline,
    subject_text: &str,
    options: AnalysisOptions,
) -> Result<PaperOverview, LlmError> {
    let request = PromptRequest::new(PAPER_OVERVIEW_TEMPLATE.as_str(), subject_text)
        .with_schema(schema::paper_overview())
        .with_temperature(options.temperature);

    let overview: PaperOverview = pipeline.request_structured(&request).await?;
    info!(keywords = overview.main_keywords.len(), "Paper overview ready");
    Ok(overview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn analysis() -> PaperAnalysis {
        PaperAnalysis {
            title: None,
            fields: vec![
                FieldScore { name: "Transportation Engineering".into(), score: 0.5 },
                FieldScore { name: "Civil Engineering".into(), score: 1.0 },
            ],
            target: Label::new("飽和交通流率", "Saturation Flow Rate"),
            methods: vec![Label::new("回帰分析", "Regression Analysis")],
            factors: vec![Label::new("縦断勾配", "Vertical Gradient")],
            metrics: vec![Label::new("飽和交通流率", "Saturation Flow Rate")],
            search_keywords: vec![],
        }
    }

    #[test]
    fn test_serialises_to_nested_wire_shape() {
        let value = serde_json::to_value(analysis()).unwrap();
        assert!(value.get("title").is_none());
        assert_eq!(value["labels"]["approaches"]["methods"][0]["en"], json!("Regression Analysis"));
        assert_eq!(value["labels"]["search_keywords"], json!([]));
    }

    #[test]
    fn test_serialised_analysis_passes_schema_and_decodes_back() {
        let value = serde_json::to_value(analysis()).unwrap();
        schema::paper_analysis().validate(&value).unwrap();
        let back: PaperAnalysis = serde_json::from_value(value).unwrap();
        assert_eq!(back, analysis());
    }

    #[test]
    fn test_primary_field_is_highest_score() {
        assert_eq!(analysis().primary_field().unwrap().name, "Civil Engineering");
    }

    #[test]
    fn test_overview_from_wire() {
        let overview: PaperOverview = serde_json::from_value(json!({
            "fields": [{"name": "Economics", "score": 1.0}, {"name": "Sociology", "score": 0.3}],
            "labels": {
                "target": {"ja": "最低賃金", "en": "Minimum Wage"},
                "main_keywords": [{"ja": "差分の差分法", "en": "Difference in Differences"}]
            }
        }))
        .unwrap();
        assert_eq!(overview.target.en, "Minimum Wage");
        assert_eq!(overview.primary_field().unwrap().name, "Economics");
    }
}
