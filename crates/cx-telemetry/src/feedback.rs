use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Feedback attached to a previously logged span. Unset fields are omitted
/// on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl FeedbackRecord {
    pub fn with_score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}
