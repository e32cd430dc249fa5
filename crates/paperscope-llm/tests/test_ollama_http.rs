//! HTTP-level tests of the Ollama client against an in-process fake server.
//!
//! Run with: cargo test --package paperscope-llm --test test_ollama_http

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, StreamExt};
use paperscope_common::OllamaConfig;
use paperscope_llm::{
    schema, ChatBackend, ChatRequest, DecodeStage, Envelope, FieldScore, Label, LlmError, Message, OllamaClient,
    PaperAnalysis, PromptRequest, StructuredPipeline,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

type Seen = Arc<Mutex<Vec<Value>>>;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A POST route that records each JSON body and answers with a fixed reply.
fn recording_route(path: &str, status: StatusCode, reply: String) -> (Router, Seen) {
    let seen: Seen = Arc::default();
    let state = seen.clone();
    let router = Router::new().route(
        path,
        post(move |Json(body): Json<Value>| {
            let state = state.clone();
            let reply = reply.clone();
            async move {
                state.lock().unwrap().push(body);
                (status, reply)
            }
        }),
    );
    (router, seen)
}

fn client(base_url: &str) -> OllamaClient {
    OllamaClient::new(&OllamaConfig {
        base_url: base_url.to_string(),
        model: "gemma3:12b".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn analysis_of_x() -> Value {
    json!({
        "title": "X",
        "fields": [{"name": "A", "score": 1.0}, {"name": "B", "score": 0.5}],
        "labels": {
            "target": {"ja": "対象", "en": "Target"},
            "approaches": {
                "methods": [{"ja": "手法", "en": "Method"}],
                "factors": [{"ja": "要因", "en": "Factor"}],
                "metrics": [{"ja": "指標", "en": "Metric"}]
            },
            "search_keywords": []
        }
    })
}

#[tokio::test]
async fn test_structured_request_end_to_end() {
    let envelope = json!({
        "model": "gemma3:12b",
        "message": {"role": "assistant", "content": format!("```json\n{}\n```", analysis_of_x())},
        "done": true
    });
    let (router, seen) = recording_route("/api/chat", StatusCode::OK, envelope.to_string());
    let base = serve(router).await;

    let pipeline = StructuredPipeline::new(Arc::new(client(&base)));
    let request = PromptRequest::new("Analyze: ", "X").with_schema(schema::paper_analysis());
    let analysis: PaperAnalysis = pipeline.request_structured(&request).await.unwrap();
    assert_eq!(analysis.title.as_deref(), Some("X"));
    assert_eq!(
        analysis.fields,
        vec![
            FieldScore { name: "A".into(), score: 1.0 },
            FieldScore { name: "B".into(), score: 0.5 },
        ]
    );
    assert_eq!(analysis.target, Label::new("対象", "Target"));

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], json!("gemma3:12b"));
    assert_eq!(bodies[0]["stream"], json!(false));
    assert_eq!(&bodies[0]["format"], schema::paper_analysis().document());
    assert_eq!(bodies[0]["messages"], json!([{"role": "user", "content": "Analyze: X"}]));
}

#[tokio::test]
async fn test_schema_is_sent_as_format() {
    let (router, seen) = recording_route(
        "/api/chat",
        StatusCode::OK,
        json!({"message": {"content": "{}"}}).to_string(),
    );
    let base = serve(router).await;

    let pipeline = StructuredPipeline::new(Arc::new(client(&base)));
    let request = PromptRequest::new("Summarise: ", "paper")
        .with_schema(schema::structured_summary());
    let err = pipeline.request_structured::<Value>(&request).await.unwrap_err();
    assert_eq!(err.kind(), "schema_violation");

    let bodies = seen.lock().unwrap();
    assert_eq!(&bodies[0]["format"], schema::structured_summary().document());
}

#[tokio::test]
async fn test_endpoint_error_carries_status_and_body() {
    let (router, _) = recording_route("/api/chat", StatusCode::INTERNAL_SERVER_ERROR, "model not loaded".into());
    let base = serve(router).await;

    let err = client(&base)
        .send(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();
    match err {
        LlmError::Endpoint { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "model not loaded");
        }
        other => panic!("Expected Endpoint error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .send(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
}

#[tokio::test]
async fn test_non_json_body_is_outer_decode_error() {
    let (router, _) = recording_route("/api/chat", StatusCode::OK, "<html>proxy error</html>".into());
    let base = serve(router).await;

    let pipeline = StructuredPipeline::new(Arc::new(client(&base)));
    let err = pipeline
        .request_structured::<Value>(&PromptRequest::new("t", "s"))
        .await
        .unwrap_err();
    match err {
        LlmError::Decode { stage, raw, .. } => {
            assert_eq!(stage, DecodeStage::Json);
            assert_eq!(raw, "<html>proxy error</html>");
        }
        other => panic!("Expected Decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_generate_envelope() {
    let reply = json!({"model": "m", "response": "```\n{\"ok\": true}\n```", "done": true});
    let (router, seen) = recording_route("/api/generate", StatusCode::OK, reply.to_string());
    let base = serve(router).await;

    let backend = client(&base).with_envelope(Envelope::Generate);
    let pipeline = StructuredPipeline::new(Arc::new(backend));
    let value: Value = pipeline.request_structured(&PromptRequest::new("Q: ", "x")).await.unwrap();
    assert_eq!(value, json!({"ok": true}));

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies[0]["prompt"], json!("Q: x"));
    assert!(bodies[0].get("system").is_none());
    assert!(bodies[0].get("messages").is_none());
}

#[tokio::test]
async fn test_streaming_reply_accumulates() {
    let ndjson = [
        r#"{"message":{"role":"assistant","content":"Traffic "},"done":false}"#,
        r#"{"message":{"role":"assistant","content":"flow."},"done":false}"#,
        r#"{"message":{"role":"assistant","content":""},"done":true}"#,
    ]
    .join("\n");
    let (router, seen) = recording_route("/api/chat", StatusCode::OK, ndjson);
    let base = serve(router).await;

    let stream = client(&base)
        .stream(&ChatRequest::new(vec![Message::user("explain")]))
        .await
        .unwrap();
    let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(items, vec!["Traffic ", "Traffic flow."]);
    assert_eq!(seen.lock().unwrap()[0]["stream"], json!(true));
}

#[tokio::test]
async fn test_stream_ends_at_done_while_server_keeps_open() {
    let router = Router::new().route(
        "/api/chat",
        post(|| async {
            let chunks = stream::iter(vec![
                Ok::<_, Infallible>("{\"message\":{\"content\":\"A\"}}\n".to_string()),
                Ok("{\"message\":{\"content\":\"B\"},\"done\":true}\n".to_string()),
            ])
            .chain(stream::pending());
            Body::from_stream(chunks)
        }),
    );
    let base = serve(router).await;

    let stream = client(&base)
        .stream(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();
    let text = tokio::time::timeout(Duration::from_secs(5), stream.collect_text())
        .await
        .expect("stream should end at done")
        .unwrap();
    assert_eq!(text, "AB");
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_early_drop_closes_connection() {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    let router = Router::new().route(
        "/api/chat",
        post(move || {
            let guard = SetOnDrop(flag.clone());
            async move {
                let first = stream::once(async { Ok::<_, Infallible>("{\"message\":{\"content\":\"A\"}}\n".to_string()) });
                let keepalive = stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok("\n".to_string()), guard))
                });
                Body::from_stream(first.chain(keepalive))
            }
        }),
    );
    let base = serve(router).await;

    let mut stream = client(&base)
        .stream(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "A");
    drop(stream);

    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !closed.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "server body was never released");
}

#[tokio::test]
async fn test_list_models() {
    let router = Router::new().route(
        "/api/tags",
        get(|| async {
            Json(json!({
                "models": [
                    {"name": "gemma3:12b", "size": 8149190253u64, "modified_at": "2025-04-01T10:00:00Z", "digest": "abc123"},
                    {"name": "gemma-textonly_v3:latest"}
                ]
            }))
        }),
    );
    let base = serve(router).await;

    let models = client(&base).list_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "gemma3:12b");
    assert_eq!(models[0].size, 8149190253);
    assert_eq!(models[1].digest, "");
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_openai_envelope_structured_request() {
    let reply = json!({
        "id": "chatcmpl-7",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": format!("```json\n{}\n```", analysis_of_x())},
            "finish_reason": "stop"
        }]
    });
    let (router, seen) = recording_route("/v1/chat/completions", StatusCode::OK, reply.to_string());
    let base = serve(router).await;

    let backend = client(&base).with_envelope(Envelope::OpenAi);
    let pipeline = StructuredPipeline::new(Arc::new(backend));
    let request = PromptRequest::new("Analyze: ", "X").with_schema(schema::paper_analysis());
    let analysis: PaperAnalysis = pipeline.request_structured(&request).await.unwrap();
    assert_eq!(analysis.title.as_deref(), Some("X"));

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies[0]["messages"], json!([{"role": "user", "content": "Analyze: X"}]));
    assert_eq!(bodies[0]["response_format"]["type"], json!("json_schema"));
    assert_eq!(&bodies[0]["response_format"]["json_schema"]["schema"], schema::paper_analysis().document());
    assert!(bodies[0].get("format").is_none());
}

#[tokio::test]
async fn test_openai_stream_reads_sse_deltas_until_done_marker() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let events = stream::iter(vec![
                Ok::<_, Infallible>("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string()),
                Ok("data: {\"choices\":[{\"delta\":{\"content\":\"飽和\"}}]}\n\n".to_string()),
                Ok("data: {\"choices\":[{\"delta\":{\"content\":\"交通流\"},\"finish_reason\":\"stop\"}]}\n\n".to_string()),
                Ok("data: [DONE]\n\n".to_string()),
            ])
            .chain(stream::pending());
            Body::from_stream(events)
        }),
    );
    let base = serve(router).await;

    let stream = client(&base)
        .with_envelope(Envelope::OpenAi)
        .stream(&ChatRequest::new(vec![Message::user("explain")]))
        .await
        .unwrap();
    let items = tokio::time::timeout(Duration::from_secs(5), stream.map(|r| r.unwrap()).collect::<Vec<_>>())
        .await
        .expect("stream should end at [DONE]");
    assert_eq!(items, vec!["飽和", "飽和交通流"]);
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLog {
    fn records(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .filter(|l| l.contains("LLM call completed"))
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn test_streaming_call_is_audited_on_release() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let ndjson = [
        r#"{"message":{"content":"Hello"},"done":false}"#,
        r#"{"message":{"content":""},"done":true}"#,
    ]
    .join("\n");
    let (router, _) = recording_route("/api/chat", StatusCode::OK, ndjson);
    let base = serve(router).await;

    let stream = client(&base)
        .stream(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();
    assert!(log.records().is_empty());
    assert_eq!(stream.collect_text().await.unwrap(), "Hello");

    let records = log.records();
    assert_eq!(records.len(), 1, "{records:?}");
    assert!(records[0].contains("streaming=true"), "{}", records[0]);
    assert!(records[0].contains("output_bytes=5"), "{}", records[0]);
    assert!(records[0].contains("envelope=chat"), "{}", records[0]);
}
