mod bootstrap;
mod cli_args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cx_ai::{ChatRequest, LlmClient, Message, OpenAiClient, OpenAiConfig};
use cx_telemetry::{FeedbackRecord, TelemetryContext};

use crate::bootstrap::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let telemetry = TelemetryContext::from_env(env!("CARGO_PKG_VERSION"));
    let outcome = run(&cli, &telemetry).await;

    // Buffered spans are delivered even when the completion failed.
    if let Err(error) = telemetry.flush().await {
        tracing::warn!(%error, "failed to flush telemetry");
    }
    outcome
}

async fn run(cli: &Cli, telemetry: &TelemetryContext) -> Result<()> {
    if let Err(error) = telemetry.init_logger(cli.project.as_deref()).await {
        tracing::warn!(%error, "telemetry logger unavailable");
    }

    let client: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(OpenAiConfig {
            api_base: cli.api_base.clone(),
            request_timeout_ms: cli.request_timeout_ms,
            ..OpenAiConfig::new(cli.openai_api_key.clone())
        })
        .context("failed to build OpenAI client")?,
    );
    let client = telemetry.wrap_client(client);

    let mut messages = Vec::new();
    if let Some(system) = &cli.system {
        messages.push(Message::system(system.clone()));
    }
    messages.push(Message::user(cli.prompt.clone()));
    let mut request = ChatRequest::new(cli.model.clone(), messages);
    request.max_tokens = cli.max_tokens;

    let response = client
        .complete(request)
        .await
        .context("chat completion failed")?;
    println!("{}", response.message.content);

    if cli.wants_feedback() {
        log_feedback(cli, telemetry).await;
    }
    Ok(())
}

async fn log_feedback(cli: &Cli, telemetry: &TelemetryContext) {
    let Some(span_id) = telemetry.last_span_id() else {
        tracing::warn!("no completion span recorded; feedback skipped");
        return;
    };
    let feedback = FeedbackRecord {
        score: cli.feedback_score,
        comment: cli.feedback_comment.clone(),
        ..FeedbackRecord::default()
    }
    .metadata_entry("model", serde_json::json!(cli.model));

    if let Err(error) = telemetry.log_feedback(&span_id, feedback).await {
        tracing::warn!(%error, span_id = %span_id, "failed to log feedback");
    }
}
