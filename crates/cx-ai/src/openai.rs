use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, new_request_id, parse_retry_after_ms, should_retry_status,
        RetryPolicy,
    },
    AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole,
    StreamDeltaHandler,
};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
/// Public struct `OpenAiConfig` used across Codex telemetry components.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            api_key: api_key.into(),
            organization: None,
            request_timeout_ms: 120_000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| AiError::InvalidConfig(format!("invalid API key header: {e}")))?,
        );
        if let Some(org) = &config.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org).map_err(|e| {
                    AiError::InvalidConfig(format!("invalid organization header: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }

    async fn complete_via_chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        let body = build_chat_request_body(request);
        let url = self.chat_completions_url();
        let started = std::time::Instant::now();
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            let response = self
                .client
                .post(&url)
                .header("x-cx-request-id", new_request_id())
                .header("x-cx-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if should_retry_status(status.as_u16()) {
                        if let Some(delay) =
                            policy.next_delay(attempt, started.elapsed(), retry_after_ms)
                        {
                            sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(AiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if is_retryable_http_error(&error) {
                        if let Some(delay) = policy.next_delay(attempt, started.elapsed(), None) {
                            sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(AiError::Http(error));
                }
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        self.complete_via_chat(&request).await
    }

    // Chat responses are requested whole; the handler sees the full reply once.
    async fn complete_with_stream(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, AiError> {
        let response = self.complete_via_chat(&request).await?;
        if let Some(handler) = on_delta {
            if !response.message.content.is_empty() {
                handler(response.message.content.clone());
            }
        }
        Ok(response)
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, AiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AiError::InvalidResponse("response contained no choices".to_string()))?;

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message {
            role: MessageRole::Assistant,
            content: choice.message.content.unwrap_or_default(),
        },
        finish_reason: choice.finish_reason,
        usage,
    })
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
