//! Telemetry for AI-completion clients.
//!
//! A [`TelemetryContext`] owns at most one logger handle. Once initialized it
//! can wrap any [`cx_ai::LlmClient`] so each completion is recorded as a span,
//! accept feedback for previously recorded spans, and flush buffered spans to
//! a [`TelemetrySink`]. Missing configuration degrades to a disabled handle
//! instead of failing the caller.

mod config;
mod context;
mod error;
mod feedback;
mod http;
mod instrument;
mod jsonl;
mod logger;
mod session;
mod sink;
mod span;

pub use config::{
    TelemetryConfig, API_KEY_ENV, API_URL_ENV, DEFAULT_API_URL, DEFAULT_MAX_PENDING_SPANS,
    DEFAULT_PROJECT_NAME, LOGGING_ENV, LOG_PATH_ENV, MAX_PENDING_SPANS_ENV, PROJECT_ENV,
    SYNC_FLUSH_ENV,
};
pub use context::{SinkFactory, TelemetryContext};
pub use error::{TelemetryError, TelemetryResult};
pub use feedback::FeedbackRecord;
pub use http::HttpTelemetrySink;
pub use instrument::{instrument_client, InstrumentFn, InstrumentedClient};
pub use jsonl::JsonlTelemetrySink;
pub use logger::{LoggerHandle, LoggerOptions, TelemetryLogger};
pub use session::{process_session_id, TelemetryMetadata, ORIGIN};
pub use sink::{FeedbackEntry, InMemoryTelemetrySink, SpanBatch, TelemetrySink};
pub use span::{LoggedSpan, PendingSpan, SpanMetrics};
