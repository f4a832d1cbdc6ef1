use std::sync::{Arc, Mutex};

use crate::sink::lock_or_recover;
use crate::{
    FeedbackRecord, LoggedSpan, TelemetryError, TelemetryMetadata, TelemetryResult, TelemetrySink,
};

/// Construction parameters for [`TelemetryLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerOptions {
    pub project_name: String,
    pub metadata: TelemetryMetadata,
    /// Buffer spans and feedback until [`TelemetryLogger::flush`] instead of
    /// sending each one as it is logged.
    pub async_flush: bool,
    /// Capacity of each buffer. The oldest entries are dropped past it.
    pub max_pending_spans: usize,
}

#[derive(Debug)]
struct QueuedFeedback {
    span_id: String,
    feedback: FeedbackRecord,
}

#[derive(Debug, Default)]
struct LoggerState {
    pending: Vec<LoggedSpan>,
    pending_feedback: Vec<QueuedFeedback>,
    last_span_id: Option<String>,
}

/// Records spans and feedback for one project.
pub struct TelemetryLogger {
    project: String,
    metadata: TelemetryMetadata,
    async_flush: bool,
    max_pending: usize,
    sink: Arc<dyn TelemetrySink>,
    state: Mutex<LoggerState>,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger")
            .field("project", &self.project)
            .field("metadata", &self.metadata)
            .field("async_flush", &self.async_flush)
            .field("max_pending", &self.max_pending)
            .field("pending_spans", &self.pending_spans())
            .finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    pub fn new(options: LoggerOptions, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            project: options.project_name,
            metadata: options.metadata,
            async_flush: options.async_flush,
            max_pending: options.max_pending_spans.max(1),
            sink,
            state: Mutex::new(LoggerState::default()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn metadata(&self) -> &TelemetryMetadata {
        &self.metadata
    }

    pub fn async_flush(&self) -> bool {
        self.async_flush
    }

    pub fn pending_spans(&self) -> usize {
        lock_or_recover(&self.state).pending.len()
    }

    pub fn pending_feedback(&self) -> usize {
        lock_or_recover(&self.state).pending_feedback.len()
    }

    /// Id of the most recently logged span, for attaching feedback to it.
    pub fn last_span_id(&self) -> Option<String> {
        lock_or_recover(&self.state).last_span_id.clone()
    }

    pub async fn log_span(&self, span: LoggedSpan) -> TelemetryResult<()> {
        {
            let mut state = lock_or_recover(&self.state);
            state.last_span_id = Some(span.span_id.clone());
            if self.async_flush {
                state.pending.push(span);
                self.enforce_capacity(&mut state);
                return Ok(());
            }
        }
        self.sink
            .send_spans(&self.project, &self.metadata, std::slice::from_ref(&span))
            .await
    }

    /// Sends every buffered span in one batch, then the buffered feedback in
    /// the order it was logged, and returns how many spans were delivered.
    /// Whatever was not delivered goes back to the front of its buffer.
    pub async fn flush(&self) -> TelemetryResult<usize> {
        let (batch, feedback) = {
            let mut state = lock_or_recover(&self.state);
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.pending_feedback),
            )
        };

        if !batch.is_empty() {
            if let Err(error) = self
                .sink
                .send_spans(&self.project, &self.metadata, &batch)
                .await
            {
                let mut state = lock_or_recover(&self.state);
                requeue_front(&mut state.pending, batch);
                requeue_front(&mut state.pending_feedback, feedback);
                self.enforce_capacity(&mut state);
                return Err(error);
            }
            tracing::debug!(
                project = %self.project,
                count = batch.len(),
                "flushed telemetry spans"
            );
        }

        let mut queued = feedback.into_iter();
        while let Some(entry) = queued.next() {
            if let Err(error) = self
                .sink
                .send_feedback(&self.project, &entry.span_id, &entry.feedback)
                .await
            {
                let mut state = lock_or_recover(&self.state);
                let undelivered = std::iter::once(entry).chain(queued).collect();
                requeue_front(&mut state.pending_feedback, undelivered);
                self.enforce_capacity(&mut state);
                return Err(error);
            }
        }
        Ok(batch.len())
    }

    /// Records feedback for `span_id`. With async flush the feedback waits
    /// behind the buffered spans so the sink never sees it before its span.
    pub async fn log_feedback(
        &self,
        span_id: &str,
        feedback: &FeedbackRecord,
    ) -> TelemetryResult<()> {
        if span_id.trim().is_empty() {
            return Err(TelemetryError::InvalidFeedback(
                "span id must not be empty".to_string(),
            ));
        }
        if self.async_flush {
            let mut state = lock_or_recover(&self.state);
            state.pending_feedback.push(QueuedFeedback {
                span_id: span_id.to_string(),
                feedback: feedback.clone(),
            });
            self.enforce_capacity(&mut state);
            return Ok(());
        }
        self.sink
            .send_feedback(&self.project, span_id, feedback)
            .await
    }

    fn enforce_capacity(&self, state: &mut LoggerState) {
        let dropped_spans = drop_oldest(&mut state.pending, self.max_pending);
        let dropped_feedback = drop_oldest(&mut state.pending_feedback, self.max_pending);
        if dropped_spans > 0 || dropped_feedback > 0 {
            tracing::warn!(
                project = %self.project,
                dropped_spans,
                dropped_feedback,
                limit = self.max_pending,
                "telemetry buffer full; dropped oldest entries"
            );
        }
    }
}

fn requeue_front<T>(buffer: &mut Vec<T>, undelivered: Vec<T>) {
    let newer = std::mem::replace(buffer, undelivered);
    buffer.extend(newer);
}

fn drop_oldest<T>(buffer: &mut Vec<T>, limit: usize) -> usize {
    let overflow = buffer.len().saturating_sub(limit);
    buffer.drain(..overflow);
    overflow
}

/// The logger slot held by a [`crate::TelemetryContext`].
#[derive(Debug, Clone)]
pub enum LoggerHandle {
    Remote(Arc<TelemetryLogger>),
    /// Telemetry is not configured; every operation succeeds without effect.
    Disabled,
}

impl LoggerHandle {
    pub fn is_enabled(&self) -> bool {
        matches!(self, LoggerHandle::Remote(_))
    }

    pub fn logger(&self) -> Option<&Arc<TelemetryLogger>> {
        match self {
            LoggerHandle::Remote(logger) => Some(logger),
            LoggerHandle::Disabled => None,
        }
    }

    pub async fn flush(&self) -> TelemetryResult<usize> {
        match self {
            LoggerHandle::Remote(logger) => logger.flush().await,
            LoggerHandle::Disabled => Ok(0),
        }
    }

    pub async fn log_feedback(
        &self,
        span_id: &str,
        feedback: &FeedbackRecord,
    ) -> TelemetryResult<()> {
        match self {
            LoggerHandle::Remote(logger) => logger.log_feedback(span_id, feedback).await,
            LoggerHandle::Disabled => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::{LoggerHandle, LoggerOptions, TelemetryLogger};
    use crate::sink::lock_or_recover;
    use crate::{
        FeedbackRecord, InMemoryTelemetrySink, LoggedSpan, PendingSpan, TelemetryError,
        TelemetryMetadata, TelemetryResult, TelemetrySink,
    };

    struct FlakySink {
        fail: AtomicBool,
        inner: InMemoryTelemetrySink,
    }

    #[async_trait]
    impl TelemetrySink for FlakySink {
        async fn send_spans(
            &self,
            project: &str,
            metadata: &TelemetryMetadata,
            spans: &[LoggedSpan],
        ) -> TelemetryResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TelemetryError::HttpStatus {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.inner.send_spans(project, metadata, spans).await
        }

        async fn send_feedback(
            &self,
            project: &str,
            span_id: &str,
            feedback: &FeedbackRecord,
        ) -> TelemetryResult<()> {
            self.inner.send_feedback(project, span_id, feedback).await
        }
    }

    /// Records the order in which the sink is called.
    #[derive(Default)]
    struct OrderSink {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TelemetrySink for OrderSink {
        async fn send_spans(
            &self,
            _project: &str,
            _metadata: &TelemetryMetadata,
            spans: &[LoggedSpan],
        ) -> TelemetryResult<()> {
            let mut events = lock_or_recover(&self.events);
            events.extend(spans.iter().map(|span| format!("span:{}", span.name)));
            Ok(())
        }

        async fn send_feedback(
            &self,
            _project: &str,
            span_id: &str,
            _feedback: &FeedbackRecord,
        ) -> TelemetryResult<()> {
            lock_or_recover(&self.events).push(format!("feedback:{span_id}"));
            Ok(())
        }
    }

    fn options(async_flush: bool) -> LoggerOptions {
        LoggerOptions {
            project_name: "Codex".to_string(),
            metadata: TelemetryMetadata::new("0.1.0", "codex_cli_rs", "s-1"),
            async_flush,
            max_pending_spans: 100,
        }
    }

    fn span(name: &str) -> LoggedSpan {
        PendingSpan::start(name, json!(null)).fail("n/a")
    }

    #[tokio::test]
    async fn functional_async_flush_buffers_until_flush() {
        let sink = Arc::new(InMemoryTelemetrySink::new());
        let logger = TelemetryLogger::new(options(true), sink.clone());

        logger.log_span(span("a")).await.expect("log a");
        logger.log_span(span("b")).await.expect("log b");
        assert_eq!(logger.pending_spans(), 2);
        assert!(sink.spans().is_empty());

        assert_eq!(logger.flush().await.expect("flush"), 2);
        assert_eq!(logger.pending_spans(), 0);
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.batches()[0].project, "Codex");
        assert_eq!(logger.flush().await.expect("second flush"), 0);
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn functional_sync_mode_sends_each_span_immediately() {
        let sink = Arc::new(InMemoryTelemetrySink::new());
        let logger = TelemetryLogger::new(options(false), sink.clone());

        let logged = span("now");
        let span_id = logged.span_id.clone();
        logger.log_span(logged).await.expect("log");
        assert_eq!(logger.pending_spans(), 0);
        assert_eq!(sink.spans().len(), 1);
        assert_eq!(logger.last_span_id(), Some(span_id));
    }

    #[tokio::test]
    async fn regression_failed_flush_keeps_spans_in_order() {
        let sink = Arc::new(FlakySink {
            fail: AtomicBool::new(true),
            inner: InMemoryTelemetrySink::new(),
        });
        let logger = TelemetryLogger::new(options(true), sink.clone());
        logger.log_span(span("first")).await.expect("log");

        let error = logger.flush().await.expect_err("sink is down");
        assert!(matches!(error, TelemetryError::HttpStatus { status: 503, .. }));
        assert_eq!(logger.pending_spans(), 1);

        logger.log_span(span("second")).await.expect("log");
        sink.fail.store(false, Ordering::SeqCst);
        assert_eq!(logger.flush().await.expect("flush"), 2);
        let names: Vec<String> = sink
            .inner
            .spans()
            .into_iter()
            .map(|span| span.name)
            .collect();
        assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn regression_feedback_is_delivered_after_its_span() {
        let sink = Arc::new(OrderSink::default());
        let logger = TelemetryLogger::new(options(true), sink.clone());

        logger.log_span(span("completion")).await.expect("log");
        let span_id = logger.last_span_id().expect("span id");
        logger
            .log_feedback(&span_id, &FeedbackRecord::with_score(1.0))
            .await
            .expect("feedback");
        assert!(lock_or_recover(&sink.events).is_empty());
        assert_eq!(logger.pending_feedback(), 1);

        assert_eq!(logger.flush().await.expect("flush"), 1);
        assert_eq!(
            *lock_or_recover(&sink.events),
            vec!["span:completion".to_string(), format!("feedback:{span_id}")]
        );
        assert_eq!(logger.pending_feedback(), 0);
    }

    #[tokio::test]
    async fn regression_failed_flush_keeps_feedback_behind_spans() {
        let sink = Arc::new(FlakySink {
            fail: AtomicBool::new(true),
            inner: InMemoryTelemetrySink::new(),
        });
        let logger = TelemetryLogger::new(options(true), sink.clone());
        logger.log_span(span("first")).await.expect("log");
        let span_id = logger.last_span_id().expect("span id");
        logger
            .log_feedback(&span_id, &FeedbackRecord::with_score(0.5))
            .await
            .expect("feedback");

        logger.flush().await.expect_err("sink is down");
        assert!(sink.inner.feedback().is_empty());
        assert_eq!(logger.pending_spans(), 1);
        assert_eq!(logger.pending_feedback(), 1);

        sink.fail.store(false, Ordering::SeqCst);
        assert_eq!(logger.flush().await.expect("flush"), 1);
        assert_eq!(sink.inner.feedback()[0].span_id, span_id);
    }

    #[tokio::test]
    async fn functional_sync_mode_sends_feedback_immediately() {
        let sink = Arc::new(InMemoryTelemetrySink::new());
        let logger = TelemetryLogger::new(options(false), sink.clone());
        logger
            .log_feedback("span-7", &FeedbackRecord::with_score(1.0))
            .await
            .expect("feedback");
        assert_eq!(logger.pending_feedback(), 0);
        assert_eq!(sink.feedback().len(), 1);
    }

    #[tokio::test]
    async fn regression_pending_buffer_drops_oldest_when_sink_is_down() {
        let sink = Arc::new(FlakySink {
            fail: AtomicBool::new(true),
            inner: InMemoryTelemetrySink::new(),
        });
        let logger = TelemetryLogger::new(
            LoggerOptions {
                max_pending_spans: 3,
                ..options(true)
            },
            sink.clone(),
        );

        for name in ["s1", "s2", "s3", "s4"] {
            logger.log_span(span(name)).await.expect("log");
        }
        assert_eq!(logger.pending_spans(), 3);
        logger.flush().await.expect_err("sink is down");
        for name in ["s5", "s6"] {
            logger.log_span(span(name)).await.expect("log");
        }
        logger.flush().await.expect_err("sink is still down");
        assert_eq!(logger.pending_spans(), 3);

        sink.fail.store(false, Ordering::SeqCst);
        assert_eq!(logger.flush().await.expect("flush"), 3);
        let names: Vec<String> = sink
            .inner
            .spans()
            .into_iter()
            .map(|span| span.name)
            .collect();
        assert_eq!(names, vec!["s4", "s5", "s6"]);
    }

    #[tokio::test]
    async fn unit_log_feedback_rejects_blank_span_id() {
        let sink = Arc::new(InMemoryTelemetrySink::new());
        let logger = TelemetryLogger::new(options(true), sink.clone());
        let error = logger
            .log_feedback("  ", &FeedbackRecord::with_score(1.0))
            .await
            .expect_err("blank span id");
        assert!(matches!(error, TelemetryError::InvalidFeedback(_)));
        assert!(sink.feedback().is_empty());
    }

    #[tokio::test]
    async fn unit_disabled_handle_is_inert() {
        let handle = LoggerHandle::Disabled;
        assert!(!handle.is_enabled());
        assert!(handle.logger().is_none());
        assert_eq!(handle.flush().await.expect("flush"), 0);
        handle
            .log_feedback("span-1", &FeedbackRecord::with_score(1.0))
            .await
            .expect("feedback is ignored");
    }
}
