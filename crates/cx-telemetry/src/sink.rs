use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{FeedbackRecord, LoggedSpan, TelemetryMetadata, TelemetryResult};

/// Destination for spans and feedback.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send_spans(
        &self,
        project: &str,
        metadata: &TelemetryMetadata,
        spans: &[LoggedSpan],
    ) -> TelemetryResult<()>;

    async fn send_feedback(
        &self,
        project: &str,
        span_id: &str,
        feedback: &FeedbackRecord,
    ) -> TelemetryResult<()>;
}

/// One `send_spans` call as seen by [`InMemoryTelemetrySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpanBatch {
    pub project: String,
    pub metadata: TelemetryMetadata,
    pub spans: Vec<LoggedSpan>,
}

/// One `send_feedback` call as seen by [`InMemoryTelemetrySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub project: String,
    pub span_id: String,
    pub feedback: FeedbackRecord,
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryTelemetrySink {
    batches: Mutex<Vec<SpanBatch>>,
    feedback: Mutex<Vec<FeedbackEntry>>,
}

impl InMemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<SpanBatch> {
        lock_or_recover(&self.batches).clone()
    }

    /// All spans received so far, in delivery order.
    pub fn spans(&self) -> Vec<LoggedSpan> {
        lock_or_recover(&self.batches)
            .iter()
            .flat_map(|batch| batch.spans.iter().cloned())
            .collect()
    }

    pub fn feedback(&self) -> Vec<FeedbackEntry> {
        lock_or_recover(&self.feedback).clone()
    }
}

#[async_trait]
impl TelemetrySink for InMemoryTelemetrySink {
    async fn send_spans(
        &self,
        project: &str,
        metadata: &TelemetryMetadata,
        spans: &[LoggedSpan],
    ) -> TelemetryResult<()> {
        lock_or_recover(&self.batches).push(SpanBatch {
            project: project.to_string(),
            metadata: metadata.clone(),
            spans: spans.to_vec(),
        });
        Ok(())
    }

    async fn send_feedback(
        &self,
        project: &str,
        span_id: &str,
        feedback: &FeedbackRecord,
    ) -> TelemetryResult<()> {
        lock_or_recover(&self.feedback).push(FeedbackEntry {
            project: project.to_string(),
            span_id: span_id.to_string(),
            feedback: feedback.clone(),
        });
        Ok(())
    }
}

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
