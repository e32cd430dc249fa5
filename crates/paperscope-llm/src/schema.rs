//! JSON Schemas for structured model output.
//!
//! Each schema is sent to the endpoint as the `format` constraint and used
//! again to validate the parsed answer. The endpoint treats the constraint as
//! a hint only, so validation is what actually guarantees the shape.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, OnceLock};

use jsonschema::Validator;
use serde_json::{json, Value};

use crate::error::LlmError;

pub const PAPER_ANALYSIS: &str = "paper_analysis";
pub const PAPER_OVERVIEW: &str = "paper_overview";
pub const STRUCTURED_SUMMARY: &str = "structured_summary";

/// A named draft-07 JSON Schema document.
///
/// The validator is compiled on first use and shared by every clone.
#[derive(Clone)]
pub struct SchemaDoc {
    name: String,
    document: Value,
    validator: Arc<OnceLock<Validator>>,
}

impl SchemaDoc {
    pub fn new(name: impl Into<String>, document: Value) -> Self {
        Self { name: name.into(), document, validator: Arc::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    fn validator(&self) -> Result<&Validator, LlmError> {
        if let Some(validator) = self.validator.get() {
            return Ok(validator);
        }
        let compiled = jsonschema::validator_for(&self.document).map_err(|e| LlmError::InvalidSchema {
            schema: self.name.clone(),
            message: format!("{e}"),
        })?;
        Ok(self.validator.get_or_init(|| compiled))
    }

    /// Validate `instance`, collecting every violation rather than stopping at the first.
    pub fn validate(&self, instance: &Value) -> Result<(), LlmError> {
        let errors: Vec<String> = self
            .validator()?
            .iter_errors(instance)
            .map(|e| format!("{e}"))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::SchemaViolation { schema: self.name.clone(), errors })
        }
    }
}

impl PartialEq for SchemaDoc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.document == other.document
    }
}

impl std::fmt::Debug for SchemaDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaDoc")
            .field("name", &self.name)
            .field("document", &self.document)
            .field("compiled", &self.validator.get().is_some())
            .finish()
    }
}

fn label_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ja": { "type": "string" },
            "en": { "type": "string" }
        },
        "required": ["ja", "en"]
    })
}

fn label_list_schema(min_items: u64) -> Value {
    json!({
        "type": "array",
        "minItems": min_items,
        "items": label_schema()
    })
}

fn field_list_schema() -> Value {
    json!({
        "type": "array",
        "minItems": 2,
        "items": {
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "score": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["name", "score"]
        }
    })
}

static PAPER_ANALYSIS_SCHEMA: LazyLock<SchemaDoc> = LazyLock::new(|| {
    SchemaDoc::new(
        PAPER_ANALYSIS,
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "StructuredPaperMetadata",
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "fields": field_list_schema(),
                "labels": {
                    "type": "object",
                    "properties": {
                        "target": label_schema(),
                        "approaches": {
                            "type": "object",
                            "properties": {
                                "methods": label_list_schema(1),
                                "factors": label_list_schema(1),
                                "metrics": label_list_schema(1)
                            },
                            "required": ["methods", "factors", "metrics"]
                        },
                        "search_keywords": label_list_schema(0)
                    },
                    "required": ["target", "approaches", "search_keywords"]
                }
            },
            "required": ["fields", "labels"],
            "additionalProperties": false
        }),
    )
});

static PAPER_OVERVIEW_SCHEMA: LazyLock<SchemaDoc> = LazyLock::new(|| {
    SchemaDoc::new(
        PAPER_OVERVIEW,
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "PaperOverview",
            "type": "object",
            "properties": {
                "fields": field_list_schema(),
                "labels": {
                    "type": "object",
                    "properties": {
                        "target": label_schema(),
                        "main_keywords": label_list_schema(1)
                    },
                    "required": ["target", "main_keywords"]
                }
            },
            "required": ["fields", "labels"],
            "additionalProperties": false
        }),
    )
});

static STRUCTURED_SUMMARY_SCHEMA: LazyLock<SchemaDoc> = LazyLock::new(|| {
    SchemaDoc::new(
        STRUCTURED_SUMMARY,
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "keywords": { "type": "array", "items": { "type": "string" } },
                "what_they_did": { "type": "string" },
                "background": { "type": "string" },
                "method": { "type": "string" },
                "results": { "type": "string" },
                "conclusion": { "type": "string" },
                "importance_level": { "type": "string" }
            },
            "required": [
                "keywords",
                "what_they_did",
                "background",
                "method",
                "results",
                "conclusion",
                "importance_level"
            ]
        }),
    )
});

/// Full paper analysis: fields, target, approaches and search keywords.
pub fn paper_analysis() -> &'static SchemaDoc {
    &PAPER_ANALYSIS_SCHEMA
}

/// Lighter analysis used for search results: fields, target and main keywords.
pub fn paper_overview() -> &'static SchemaDoc {
    &PAPER_OVERVIEW_SCHEMA
}

pub fn structured_summary() -> &'static SchemaDoc {
    &STRUCTURED_SUMMARY_SCHEMA
}

/// Lookup of the built-in schemas by name.
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, &'static SchemaDoc>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(PAPER_ANALYSIS, paper_analysis());
        schemas.insert(PAPER_OVERVIEW, paper_overview());
        schemas.insert(STRUCTURED_SUMMARY, structured_summary());
        Self { schemas }
    }

    pub fn get(&self, name: &str) -> Option<&'static SchemaDoc> {
        self.schemas.get(name).copied()
    }

    pub fn validate(&self, name: &str, instance: &Value) -> Result<(), LlmError> {
        self.get(name)
            .ok_or_else(|| LlmError::UnknownSchema(name.to_string()))?
            .validate(instance)
    }

    /// Registered schema names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.schemas.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
