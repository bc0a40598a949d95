//! Per-invocation validation context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::scan::{scan_segments, ScanSegment};

/// Metadata key listing the compliance frameworks that apply.
pub const FRAMEWORKS_KEY: &str = "frameworks";

/// Metadata key naming the logical dimension (domain) of the event.
pub const DIMENSION_KEY: &str = "dimension";

/// Input to one invocation. Shared read-only with every validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationContext {
    pub event_id: String,
    /// Opaque payload: structured JSON or a plain string.
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Pre-computed payload embedding, if the event source already has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Wire name of [`ValidationContext`].
pub type ValidationRequest = ValidationContext;

impl ValidationContext {
    pub fn new(event_id: &str, payload: Value) -> Self {
        Self {
            event_id: event_id.to_string(),
            payload,
            metadata: Map::new(),
            embedding: None,
        }
    }

    /// Convenience constructor for plain-text payloads.
    pub fn text(event_id: &str, text: &str) -> Self {
        Self::new(event_id, Value::String(text.to_string()))
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_frameworks<S: AsRef<str>>(self, frameworks: &[S]) -> Self {
        let list = frameworks
            .iter()
            .map(|f| Value::String(f.as_ref().to_string()))
            .collect();
        self.with_metadata(FRAMEWORKS_KEY, Value::Array(list))
    }

    pub fn with_dimension(self, dimension: &str) -> Self {
        self.with_metadata(DIMENSION_KEY, Value::String(dimension.to_string()))
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Frameworks listed in `metadata.frameworks`.
    ///
    /// Accepts an array of strings or a single comma-separated string.
    pub fn frameworks(&self) -> Vec<String> {
        match self.metadata.get(FRAMEWORKS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn dimension(&self) -> Option<&str> {
        self.metadata.get(DIMENSION_KEY).and_then(Value::as_str)
    }

    /// Segments seen by pattern scanners.
    ///
    /// A string payload is one verbatim segment; structured payloads yield
    /// one segment per member, keyed by JSON pointer.
    pub fn scan_segments(&self) -> Vec<ScanSegment> {
        scan_segments(&self.payload)
    }
}
