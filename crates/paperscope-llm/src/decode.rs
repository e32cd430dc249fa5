//! Structured decoding of cleaned endpoint output.
//!
//! The endpoint wraps the model's answer in a transport envelope
//! (`message.content` for chat, `response` for generate,
//! `choices[0].message.content` for OpenAI-compatible servers). The answer is
//! itself meant to be JSON but often arrives inside a markdown fence, so the
//! inner text is cleaned again before the second parse.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clean::clean;
use crate::error::{DecodeStage, LlmError};
use crate::schema::SchemaDoc;

/// The model's answer inside a chat, generate or OpenAI completion envelope.
pub fn envelope_content(value: &Value) -> Option<&str> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .or_else(|| value.get("response").and_then(Value::as_str))
        .or_else(|| value.pointer("/choices/0/message/content").and_then(Value::as_str))
}

/// Parse, unwrap one envelope level if present, and validate against `schema`.
pub fn decode_value(cleaned: &str, schema: Option<&SchemaDoc>) -> Result<Value, LlmError> {
    let outer: Value = serde_json::from_str(cleaned)
        .map_err(|e| LlmError::decode(DecodeStage::Json, cleaned, e))?;

    let value = match envelope_content(&outer) {
        Some(content) => {
            let inner = clean(content);
            serde_json::from_str(&inner)
                .map_err(|e| LlmError::decode(DecodeStage::InnerJson, inner.as_str(), e))?
        }
        None => outer,
    };

    if let Some(schema) = schema {
        schema.validate(&value)?;
    }

    Ok(value)
}

/// [`decode_value`] followed by a typed mapping into `T`.
pub fn decode<T: DeserializeOwned>(cleaned: &str, schema: Option<&SchemaDoc>) -> Result<T, LlmError> {
    let value = decode_value(cleaned, schema)?;
    serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation {
        schema: schema
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| std::any::type_name::<T>().to_string()),
        errors: vec![e.to_string()],
    })
}

/// Trimmed answer text from a non-structured completion body.
pub fn extract_text(raw: &str) -> Result<String, LlmError> {
    let outer: Value = serde_json::from_str(raw)
        .map_err(|e| LlmError::decode(DecodeStage::Json, raw, e))?;

    match envelope_content(&outer) {
        Some(content) => Ok(content.trim().to_string()),
        None => Err(LlmError::decode(
            DecodeStage::Json,
            raw,
            serde::de::Error::custom("response has no message.content, response or choices[0].message.content"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::structured_summary;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn summary_json() -> Value {
        json!({
            "keywords": ["BERT", "sentiment analysis"],
            "what_they_did": "Built a sentiment model for tweets with BERT",
            "background": "Noisy short texts",
            "method": "Fine-tuning",
            "results": "Improved F1",
            "conclusion": "Transfer learning helps",
            "importance_level": "medium"
        })
    }

    fn chat_envelope(content: &str) -> String {
        json!({ "model": "m", "message": { "role": "assistant", "content": content }, "done": true }).to_string()
    }

    #[test]
    fn test_non_json_fails_at_outer_stage() {
        match decode_value("this is not json", None) {
            Err(LlmError::Decode { stage, raw, .. }) => {
                assert_eq!(stage, DecodeStage::Json);
                assert_eq!(raw, "this is not json");
            }
            other => panic!("Expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_object_is_returned_as_is() {
        let value = decode_value(r#"{"a": [1, 2]}"#, None).unwrap();
        assert_eq!(value, json!({"a": [1, 2]}));
    }

    #[test]
    fn test_chat_envelope_with_fenced_answer() {
        let inner = format!("```json\n{}\n```", summary_json());
        let value = decode_value(&chat_envelope(&inner), Some(structured_summary())).unwrap();
        assert_eq!(value, summary_json());
    }

    #[test]
    fn test_generate_envelope_is_unwrapped() {
        let body = json!({ "model": "m", "response": "```\n{\"ok\": true}\n```", "done": true }).to_string();
        assert_eq!(decode_value(&body, None).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_openai_envelope_is_unwrapped() {
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "```json\n{\"ok\": true}\n```"},
                "finish_reason": "stop"
            }]
        })
        .to_string();
        assert_eq!(decode_value(&body, None).unwrap(), json!({"ok": true}));
        assert_eq!(extract_text(&body).unwrap(), "```json\n{\"ok\": true}\n```");
    }

    #[test]
    fn test_inner_prose_fails_at_inner_stage() {
        let body = chat_envelope("```json\nSure! Here is the summary.\n```");
        match decode_value(&body, None) {
            Err(LlmError::Decode { stage, raw, .. }) => {
                assert_eq!(stage, DecodeStage::InnerJson);
                assert_eq!(raw, "Sure! Here is the summary.");
            }
            other => panic!("Expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let mut answer = summary_json();
        answer.as_object_mut().unwrap().remove("conclusion");
        let body = chat_envelope(&answer.to_string());

        match decode_value(&body, Some(structured_summary())) {
            Err(LlmError::SchemaViolation { errors, .. }) => {
                assert!(errors.iter().any(|e| e.contains("conclusion")), "{errors:?}");
            }
            other => panic!("Expected SchemaViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_typed_mapping_failure_without_schema() {
        #[derive(Debug, serde::Deserialize)]
        struct Needs {
            #[allow(dead_code)]
            count: u32,
        }
        let err = decode::<Needs>(r#"{"count": "many"}"#, None).unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_extract_text_trims_content() {
        let body = chat_envelope("  A short summary.\n");
        assert_eq!(extract_text(&body).unwrap(), "A short summary.");
    }

    #[test]
    fn test_extract_text_without_content() {
        let err = extract_text(r#"{"done": true}"#).unwrap_err();
        assert!(matches!(err, LlmError::Decode { stage: DecodeStage::Json, .. }));
    }
}
