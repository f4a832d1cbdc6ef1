use std::sync::Arc;

use cx_ai::retry::RetryPolicy;
use cx_ai::{ChatRequest, LlmClient, Message, OpenAiClient, OpenAiConfig};
use cx_telemetry::{
    FeedbackRecord, LoggerHandle, TelemetryConfig, TelemetryContext, TelemetryMetadata,
};
use httpmock::prelude::*;
use serde_json::{json, Value};

fn openai_client(base_url: String) -> Arc<dyn LlmClient> {
    let client = OpenAiClient::new(OpenAiConfig {
        api_base: base_url,
        request_timeout_ms: 5_000,
        retry: RetryPolicy {
            max_retries: 0,
            budget_ms: 0,
            jitter: false,
        },
        ..OpenAiConfig::new("sk-test")
    })
    .expect("openai client");
    Arc::new(client)
}

fn metadata() -> TelemetryMetadata {
    TelemetryMetadata::new("9.9.9", "codex_cli_rs", "session-it")
}

fn mock_completion(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(json!({
            "choices": [{
                "message": { "content": "pong" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6 }
        }));
    })
}

#[tokio::test]
async fn integration_wrapped_openai_client_delivers_span_and_feedback_over_http() {
    let provider = MockServer::start();
    let completion = mock_completion(&provider);

    let backend = MockServer::start();
    let insert = backend.mock(|when, then| {
        when.method(POST)
            .path("/v1/project_logs/codex-it/insert")
            .header("authorization", "Bearer bt-it")
            .json_body_includes(
                json!({
                    "events": [{
                        "name": "chat.completion",
                        "metrics": { "prompt_tokens": 5, "total_tokens": 6 },
                        "metadata": { "session_id": "session-it", "model": "gpt-4o-mini" }
                    }]
                })
                .to_string(),
            );
        then.status(200).json_body(json!({ "row_ids": ["row-1"] }));
    });
    let feedback = backend.mock(|when, then| {
        when.method(POST)
            .path("/v1/project_logs/codex-it/feedback")
            .json_body_includes(json!({ "feedback": [{ "score": 1.0 }] }).to_string());
        then.status(200).json_body(json!({ "status": "success" }));
    });

    let config = TelemetryConfig {
        api_url: backend.base_url(),
        ..TelemetryConfig::default().with_api_key("bt-it")
    };
    let context = TelemetryContext::new(config, metadata());
    let handle = context.init_logger(Some("codex-it")).await.expect("init");
    assert!(handle.is_enabled());

    let client = context.wrap_client(openai_client(provider.base_url()));
    let response = client
        .complete(ChatRequest::new("gpt-4o-mini", vec![Message::user("ping")]))
        .await
        .expect("completion");
    assert_eq!(response.message.content, "pong");
    completion.assert();
    assert_eq!(insert.calls(), 0, "spans stay buffered until flush");

    let span_id = context.last_span_id().expect("span id");
    context
        .log_feedback(&span_id, FeedbackRecord::with_score(1.0))
        .await
        .expect("feedback");
    assert_eq!(feedback.calls(), 0, "feedback waits behind its span");

    assert_eq!(context.flush().await.expect("flush"), 1);
    insert.assert();
    feedback.assert();
}

#[tokio::test]
async fn integration_unconfigured_context_leaves_client_untouched() {
    let provider = MockServer::start();
    let completion = mock_completion(&provider);

    let context = TelemetryContext::new(TelemetryConfig::default(), metadata());
    let handle = context.init_logger(None).await.expect("init");
    assert!(matches!(handle, LoggerHandle::Disabled));

    let client = openai_client(provider.base_url());
    let wrapped = context.wrap_client(client.clone());
    assert!(Arc::ptr_eq(&client, &wrapped));

    wrapped
        .complete(ChatRequest::new("gpt-4o-mini", vec![Message::user("ping")]))
        .await
        .expect("completion");
    completion.assert();
    assert_eq!(context.flush().await.expect("flush"), 0);
    assert!(context.last_span_id().is_none());
}

#[tokio::test]
async fn integration_log_path_routes_spans_to_jsonl_file() {
    let provider = MockServer::start();
    let _completion = mock_completion(&provider);
    let temp = tempfile::tempdir().expect("tempdir");
    let log_path = temp.path().join("telemetry.jsonl");

    let config = TelemetryConfig {
        log_path: Some(log_path.clone()),
        ..TelemetryConfig::default().with_api_key("bt-it")
    };
    let context = TelemetryContext::new(config, metadata());
    context.init_logger(None).await.expect("init");

    let client = context.wrap_client(openai_client(provider.base_url()));
    client
        .complete(ChatRequest::new("gpt-4o-mini", vec![Message::user("ping")]))
        .await
        .expect("completion");
    context.flush().await.expect("flush");

    let raw = std::fs::read_to_string(&log_path).expect("read log");
    let record: Value = serde_json::from_str(raw.lines().next().expect("one line"))
        .expect("json line");
    assert_eq!(record["project"], "Codex");
    assert_eq!(record["metadata"]["cli_version"], "9.9.9");
    assert_eq!(record["span"]["output"]["content"], "pong");
}
