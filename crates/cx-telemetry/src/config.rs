use std::fmt;
use std::path::PathBuf;

pub const API_KEY_ENV: &str = "CODEX_TELEMETRY_API_KEY";
pub const API_URL_ENV: &str = "CODEX_TELEMETRY_API_URL";
pub const PROJECT_ENV: &str = "CODEX_TELEMETRY_PROJECT";
pub const LOGGING_ENV: &str = "CODEX_TELEMETRY_LOGGING";
pub const LOG_PATH_ENV: &str = "CODEX_TELEMETRY_LOG_PATH";
pub const SYNC_FLUSH_ENV: &str = "CODEX_TELEMETRY_SYNC_FLUSH";
pub const MAX_PENDING_SPANS_ENV: &str = "CODEX_TELEMETRY_MAX_PENDING_SPANS";

pub const DEFAULT_PROJECT_NAME: &str = "Codex";
pub const DEFAULT_API_URL: &str = "https://api.braintrust.dev";
pub const DEFAULT_MAX_PENDING_SPANS: usize = 1_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Telemetry settings resolved once from the process environment.
#[derive(Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Telemetry is disabled entirely when no key is configured.
    pub api_key: Option<String>,
    pub api_url: String,
    pub project_name: String,
    pub logging_enabled: bool,
    pub async_flush: bool,
    /// Write spans to a local JSONL file instead of the HTTP backend.
    pub log_path: Option<PathBuf>,
    pub request_timeout_ms: u64,
    /// Upper bound on buffered spans; the oldest are dropped past it.
    pub max_pending_spans: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            logging_enabled: true,
            async_flush: true,
            log_path: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_pending_spans: DEFAULT_MAX_PENDING_SPANS,
        }
    }
}

impl fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("project_name", &self.project_name)
            .field("logging_enabled", &self.logging_enabled)
            .field("async_flush", &self.async_flush)
            .field("log_path", &self.log_path)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_pending_spans", &self.max_pending_spans)
            .finish()
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name).and_then(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        let defaults = Self::default();
        Self {
            api_key: non_empty(API_KEY_ENV),
            api_url: non_empty(API_URL_ENV).unwrap_or(defaults.api_url),
            project_name: non_empty(PROJECT_ENV).unwrap_or(defaults.project_name),
            logging_enabled: non_empty(LOGGING_ENV)
                .and_then(|raw| parse_bool_flag(&raw))
                .unwrap_or(defaults.logging_enabled),
            async_flush: !non_empty(SYNC_FLUSH_ENV)
                .and_then(|raw| parse_bool_flag(&raw))
                .unwrap_or(false),
            log_path: non_empty(LOG_PATH_ENV).map(PathBuf::from),
            request_timeout_ms: defaults.request_timeout_ms,
            max_pending_spans: non_empty(MAX_PENDING_SPANS_ENV)
                .and_then(|raw| raw.parse::<usize>().ok())
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.max_pending_spans),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then(|| api_key.trim().to_string());
        self
    }

    pub fn with_logging_enabled(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
