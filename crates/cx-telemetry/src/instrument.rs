use std::sync::Arc;

use async_trait::async_trait;
use cx_ai::{AiError, ChatRequest, ChatResponse, LlmClient, StreamDeltaHandler};
use serde_json::{json, Value};

use crate::{PendingSpan, TelemetryLogger, TelemetryResult};

const COMPLETION_SPAN_NAME: &str = "chat.completion";

/// Produces an instrumented client from a plain one. Hooks may refuse by
/// returning an error, in which case the permissive wrap keeps the original.
pub type InstrumentFn = Arc<
    dyn Fn(Arc<dyn LlmClient>, Arc<TelemetryLogger>) -> TelemetryResult<Arc<dyn LlmClient>>
        + Send
        + Sync,
>;

/// Default [`InstrumentFn`]: wraps `client` in an [`InstrumentedClient`].
pub fn instrument_client(
    client: Arc<dyn LlmClient>,
    logger: Arc<TelemetryLogger>,
) -> TelemetryResult<Arc<dyn LlmClient>> {
    Ok(Arc::new(InstrumentedClient::new(client, logger)))
}

/// Completion client that logs one span per request and otherwise behaves
/// exactly like the client it wraps.
pub struct InstrumentedClient {
    inner: Arc<dyn LlmClient>,
    logger: Arc<TelemetryLogger>,
}

impl InstrumentedClient {
    pub fn new(inner: Arc<dyn LlmClient>, logger: Arc<TelemetryLogger>) -> Self {
        Self { inner, logger }
    }

    async fn record(&self, pending: PendingSpan, result: &Result<ChatResponse, AiError>) {
        let span = match result {
            Ok(response) => {
                let finish_reason = json!(response.finish_reason);
                pending
                    .with_metadata("finish_reason", finish_reason)
                    .finish(json!(response.message), &response.usage)
            }
            Err(error) => pending.fail(error.to_string()),
        };
        if let Err(error) = self.logger.log_span(span).await {
            tracing::warn!(%error, "failed to record completion span");
        }
    }
}

fn start_completion_span(request: &ChatRequest) -> PendingSpan {
    let mut input = json!({ "messages": request.messages });
    if let Some(max_tokens) = request.max_tokens {
        input["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        input["temperature"] = json!(temperature);
    }
    PendingSpan::start(COMPLETION_SPAN_NAME, input)
        .with_metadata("model", Value::String(request.model.clone()))
}

#[async_trait]
impl LlmClient for InstrumentedClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        let pending = start_completion_span(&request);
        let result = self.inner.complete(request).await;
        self.record(pending, &result).await;
        result
    }

    async fn complete_with_stream(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, AiError> {
        let pending = start_completion_span(&request).with_metadata("stream", json!(true));
        let result = self.inner.complete_with_stream(request, on_delta).await;
        self.record(pending, &result).await;
        result
    }
}
