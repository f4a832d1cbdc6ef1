use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::sink::lock_or_recover;
use crate::{FeedbackRecord, LoggedSpan, TelemetryMetadata, TelemetryResult, TelemetrySink};

/// Sink that appends one JSON record per span or feedback entry to a file.
#[derive(Debug)]
pub struct JsonlTelemetrySink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlTelemetrySink {
    pub fn open(path: impl Into<PathBuf>) -> TelemetryResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_lines(&self, lines: &[String]) -> TelemetryResult<()> {
        let mut file = lock_or_recover(&self.file);
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for JsonlTelemetrySink {
    async fn send_spans(
        &self,
        project: &str,
        metadata: &TelemetryMetadata,
        spans: &[LoggedSpan],
    ) -> TelemetryResult<()> {
        let lines = spans
            .iter()
            .map(|span| {
                serde_json::to_string(&json!({
                    "record_type": "span",
                    "project": project,
                    "metadata": metadata,
                    "span": span,
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.append_lines(&lines)
    }

    async fn send_feedback(
        &self,
        project: &str,
        span_id: &str,
        feedback: &FeedbackRecord,
    ) -> TelemetryResult<()> {
        let line = serde_json::to_string(&json!({
            "record_type": "feedback",
            "project": project,
            "span_id": span_id,
            "timestamp_unix_ms": Utc::now().timestamp_millis(),
            "feedback": feedback,
        }))?;
        self.append_lines(&[line])
    }
}
