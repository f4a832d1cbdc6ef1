use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use cx_ai::ChatUsage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timing and token counts for one span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMetrics {
    pub duration_ms: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A completed unit of work ready to be sent to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedSpan {
    pub span_id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: SpanMetrics,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// A span that has started but not yet produced output.
#[derive(Debug)]
pub struct PendingSpan {
    span_id: String,
    name: String,
    input: Value,
    metadata: Map<String, Value>,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl PendingSpan {
    pub fn start(name: impl Into<String>, input: Value) -> Self {
        Self {
            span_id: next_span_id(),
            name: name.into(),
            input,
            metadata: Map::new(),
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn finish(self, output: Value, usage: &ChatUsage) -> LoggedSpan {
        let mut span = self.close(Some(output), None);
        span.metrics.prompt_tokens = usage.input_tokens;
        span.metrics.completion_tokens = usage.output_tokens;
        span.metrics.total_tokens = usage.total_tokens;
        span
    }

    pub fn fail(self, error: impl Into<String>) -> LoggedSpan {
        self.close(None, Some(error.into()))
    }

    fn close(self, output: Option<Value>, error: Option<String>) -> LoggedSpan {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        LoggedSpan {
            span_id: self.span_id,
            name: self.name,
            input: self.input,
            output,
            error,
            metrics: SpanMetrics {
                duration_ms,
                ..SpanMetrics::default()
            },
            metadata: self.metadata,
            start_time: self.start_time,
            end_time: Utc::now(),
        }
    }
}

fn next_span_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let value = COUNTER.fetch_add(1, Ordering::Relaxed);
    let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("span-{now_ns}-{value}")
}
