use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::{
    FeedbackRecord, LoggedSpan, TelemetryError, TelemetryMetadata, TelemetryResult, TelemetrySink,
};

/// Sink that posts spans and feedback to the telemetry service as JSON.
#[derive(Debug, Clone)]
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    api_url: String,
}

impl HttpTelemetrySink {
    pub fn new(api_key: &str, api_url: &str, request_timeout_ms: u64) -> TelemetryResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|error| {
                TelemetryError::InvalidConfig(format!("invalid API key header: {error}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn project_url(&self, project: &str, action: &str) -> String {
        format!(
            "{}/v1/project_logs/{}/{action}",
            self.api_url,
            encode_path_segment(project)
        )
    }

    async fn post(&self, url: String, body: Value) -> TelemetryResult<()> {
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TelemetryError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn send_spans(
        &self,
        project: &str,
        metadata: &TelemetryMetadata,
        spans: &[LoggedSpan],
    ) -> TelemetryResult<()> {
        let events = spans
            .iter()
            .map(|span| span_event(metadata, span))
            .collect::<TelemetryResult<Vec<_>>>()?;
        tracing::debug!(project, count = events.len(), "posting telemetry spans");
        self.post(self.project_url(project, "insert"), json!({ "events": events }))
            .await
    }

    async fn send_feedback(
        &self,
        project: &str,
        span_id: &str,
        feedback: &FeedbackRecord,
    ) -> TelemetryResult<()> {
        let mut entry = serde_json::to_value(feedback)?;
        entry["id"] = json!(span_id);
        self.post(
            self.project_url(project, "feedback"),
            json!({ "feedback": [entry] }),
        )
        .await
    }
}

// Process metadata is merged under span metadata; span keys win on conflict.
fn span_event(metadata: &TelemetryMetadata, span: &LoggedSpan) -> TelemetryResult<Value> {
    let mut event = serde_json::to_value(span)?;
    let mut merged = match serde_json::to_value(metadata)? {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    merged.extend(span.metadata.clone());
    event["metadata"] = Value::Object(merged);
    event["id"] = json!(span.span_id);
    Ok(event)
}

fn encode_path_segment(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
