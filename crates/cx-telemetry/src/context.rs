use std::sync::Arc;

use cx_ai::LlmClient;
use tokio::sync::OnceCell;

use crate::{
    instrument_client, FeedbackRecord, HttpTelemetrySink, InstrumentFn, JsonlTelemetrySink,
    LoggerHandle, LoggerOptions, TelemetryConfig, TelemetryError, TelemetryLogger,
    TelemetryMetadata, TelemetryResult, TelemetrySink,
};

/// Builds the sink a newly initialized logger writes to.
pub type SinkFactory =
    Arc<dyn Fn(&TelemetryConfig) -> TelemetryResult<Arc<dyn TelemetrySink>> + Send + Sync>;

/// Owns the telemetry configuration and the lazily created logger handle.
///
/// Construct one per process and pass it by reference to whatever needs
/// telemetry. The handle is set at most once and never replaced.
pub struct TelemetryContext {
    config: TelemetryConfig,
    metadata: TelemetryMetadata,
    handle: OnceCell<LoggerHandle>,
    sink_factory: SinkFactory,
    instrument: InstrumentFn,
}

impl std::fmt::Debug for TelemetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryContext")
            .field("config", &self.config)
            .field("metadata", &self.metadata)
            .field("handle", &self.handle.get())
            .finish_non_exhaustive()
    }
}

impl TelemetryContext {
    pub fn new(config: TelemetryConfig, metadata: TelemetryMetadata) -> Self {
        Self {
            config,
            metadata,
            handle: OnceCell::new(),
            sink_factory: Arc::new(default_sink),
            instrument: Arc::new(instrument_client),
        }
    }

    /// Reads [`TelemetryConfig::from_env`] and tags spans with `cli_version`.
    pub fn from_env(cli_version: &str) -> Self {
        Self::new(
            TelemetryConfig::from_env(),
            TelemetryMetadata::for_current_process(cli_version),
        )
    }

    pub fn with_sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = factory;
        self
    }

    pub fn with_sink(self, sink: Arc<dyn TelemetrySink>) -> Self {
        let factory: SinkFactory = Arc::new(move |_| Ok(Arc::clone(&sink)));
        self.with_sink_factory(factory)
    }

    pub fn with_instrumenter(mut self, instrument: InstrumentFn) -> Self {
        self.instrument = instrument;
        self
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn metadata(&self) -> &TelemetryMetadata {
        &self.metadata
    }

    /// The handle, if [`Self::init_logger`] has completed.
    pub fn handle(&self) -> Option<&LoggerHandle> {
        self.handle.get()
    }

    /// Creates the logger on first call and returns the same handle on every
    /// later call. `project_name` falls back to the configured project.
    ///
    /// Without an API key the handle is [`LoggerHandle::Disabled`] and no sink
    /// is built. Concurrent callers share a single initialization.
    pub async fn init_logger(&self, project_name: Option<&str>) -> TelemetryResult<&LoggerHandle> {
        self.handle
            .get_or_try_init(|| async move { self.create_handle(project_name) })
            .await
    }

    fn create_handle(&self, project_name: Option<&str>) -> TelemetryResult<LoggerHandle> {
        if !self.config.is_configured() {
            tracing::debug!("telemetry API key not set; telemetry disabled");
            return Ok(LoggerHandle::Disabled);
        }

        let project_name = project_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.config.project_name)
            .to_string();
        let sink = (self.sink_factory)(&self.config)?;
        tracing::info!(
            project = %project_name,
            session_id = %self.metadata.session_id,
            "telemetry logger initialized"
        );
        Ok(LoggerHandle::Remote(Arc::new(TelemetryLogger::new(
            LoggerOptions {
                project_name,
                metadata: self.metadata.clone(),
                async_flush: self.config.async_flush,
                max_pending_spans: self.config.max_pending_spans,
            },
            sink,
        ))))
    }

    /// Strict wrap: fails with [`TelemetryError::Uninitialized`] before
    /// [`Self::init_logger`], returns `client` itself when telemetry is
    /// disabled, and propagates instrumentation errors.
    pub fn try_wrap_client(
        &self,
        client: Arc<dyn LlmClient>,
    ) -> TelemetryResult<Arc<dyn LlmClient>> {
        let handle = self.handle.get().ok_or(TelemetryError::Uninitialized)?;
        let LoggerHandle::Remote(logger) = handle else {
            return Ok(client);
        };
        if !self.config.logging_enabled {
            return Ok(client);
        }
        (self.instrument)(client, Arc::clone(logger))
    }

    /// Permissive wrap: returns `client` itself whenever it cannot be
    /// instrumented. Never fails.
    pub fn wrap_client(&self, client: Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
        if !self.config.is_configured() || !self.config.logging_enabled {
            return client;
        }
        match self.try_wrap_client(Arc::clone(&client)) {
            Ok(wrapped) => wrapped,
            Err(TelemetryError::Uninitialized) => {
                tracing::debug!("telemetry logger not initialized; client left unwrapped");
                client
            }
            Err(error) => {
                tracing::warn!(%error, "failed to wrap completion client with telemetry");
                client
            }
        }
    }

    /// Delivers buffered spans. A no-op before initialization or when
    /// telemetry is disabled.
    pub async fn flush(&self) -> TelemetryResult<usize> {
        match self.handle.get() {
            Some(handle) => handle.flush().await,
            None => Ok(0),
        }
    }

    pub async fn log_feedback(
        &self,
        span_id: &str,
        feedback: FeedbackRecord,
    ) -> TelemetryResult<()> {
        let handle = self.handle.get().ok_or(TelemetryError::Uninitialized)?;
        handle.log_feedback(span_id, &feedback).await
    }

    /// Id of the most recent completion span, if any was recorded.
    pub fn last_span_id(&self) -> Option<String> {
        self.handle
            .get()
            .and_then(LoggerHandle::logger)
            .and_then(|logger| logger.last_span_id())
    }
}

fn default_sink(config: &TelemetryConfig) -> TelemetryResult<Arc<dyn TelemetrySink>> {
    if let Some(path) = &config.log_path {
        return Ok(Arc::new(JsonlTelemetrySink::open(path)?));
    }
    let api_key = config.api_key.as_deref().ok_or_else(|| {
        TelemetryError::InvalidConfig("telemetry API key is required for HTTP delivery".into())
    })?;
    Ok(Arc::new(HttpTelemetrySink::new(
        api_key,
        &config.api_url,
        config.request_timeout_ms,
    )?))
}
