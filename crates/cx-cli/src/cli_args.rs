use clap::Parser;

fn parse_score(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse score: {error}"))?;
    if !parsed.is_finite() {
        return Err("score must be a finite number".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "codex-telemetry",
    about = "Run a chat completion with optional telemetry and feedback logging",
    version
)]
pub struct Cli {
    #[arg(long, env = "CODEX_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    #[arg(long, help = "Prompt sent as the user message")]
    pub prompt: String,

    #[arg(long, help = "Optional system message sent before the prompt")]
    pub system: Option<String>,

    #[arg(
        long,
        env = "CODEX_TELEMETRY_PROJECT",
        help = "Telemetry project name; defaults to Codex"
    )]
    pub project: Option<String>,

    #[arg(
        long = "api-base",
        env = "OPENAI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub api_base: String,

    #[arg(long = "openai-api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,

    #[arg(long = "request-timeout-ms", default_value_t = 120_000)]
    pub request_timeout_ms: u64,

    #[arg(
        long = "feedback-score",
        value_parser = parse_score,
        help = "Score attached to the completion span after it finishes"
    )]
    pub feedback_score: Option<f64>,

    #[arg(long = "feedback-comment")]
    pub feedback_comment: Option<String>,
}

impl Cli {
    pub fn wants_feedback(&self) -> bool {
        self.feedback_score.is_some() || self.feedback_comment.is_some()
    }
}
