use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Origin tag attached to every span emitted by this client.
pub const ORIGIN: &str = "codex_cli_rs";

/// Static metadata attached to the logger when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMetadata {
    pub cli_version: String,
    pub origin: String,
    pub session_id: String,
}

impl TelemetryMetadata {
    pub fn new(
        cli_version: impl Into<String>,
        origin: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            cli_version: cli_version.into(),
            origin: origin.into(),
            session_id: session_id.into(),
        }
    }

    /// Metadata for this process: the given CLI version, [`ORIGIN`] and the
    /// process-wide session id.
    pub fn for_current_process(cli_version: impl Into<String>) -> Self {
        Self::new(cli_version, ORIGIN, process_session_id())
    }
}

/// Session id shared by everything in this process; generated on first use.
pub fn process_session_id() -> &'static str {
    static SESSION_ID: OnceLock<String> = OnceLock::new();
    SESSION_ID.get_or_init(|| {
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{now_ns:x}-{:x}", std::process::id())
    })
}

#[cfg(test)]
mod tests {
    use super::{process_session_id, TelemetryMetadata, ORIGIN};

    #[test]
    fn unit_process_session_id_is_stable() {
        assert_eq!(process_session_id(), process_session_id());
        assert!(!process_session_id().is_empty());
    }

    #[test]
    fn unit_metadata_serializes_with_expected_keys() {
        let metadata = TelemetryMetadata::for_current_process("1.2.3");
        let value = serde_json::to_value(&metadata).expect("encode");
        assert_eq!(value["cli_version"], "1.2.3");
        assert_eq!(value["origin"], ORIGIN);
        assert_eq!(value["session_id"], process_session_id());
        assert_eq!(value.as_object().map(|map| map.len()), Some(3));
    }
}
