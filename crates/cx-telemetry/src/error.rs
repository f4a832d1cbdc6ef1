use thiserror::Error;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors returned by the telemetry layer.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry logger not initialized; call init_logger first")]
    Uninitialized,
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),
    #[error("failed to instrument completion client: {0}")]
    Instrumentation(String),
    #[error("telemetry http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telemetry backend returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
