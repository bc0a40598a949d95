//! Error taxonomy for the QA engine.

use crate::rules::RuleLoadError;

/// Errors produced while loading or checking engine configuration.
///
/// A configuration error is raised before any validator runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("event {event_id} names unknown validator: {name}")]
    UnknownValidator { event_id: String, name: String },

    #[error("event {event_id} must have a positive max_latency_ms")]
    ZeroLatency { event_id: String },

    #[error("duplicate event definition: {0}")]
    DuplicateEvent(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
}

/// QA engine errors.
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("rule load error: {0}")]
    RuleLoad(#[from] RuleLoadError),

    #[error("event router is not running")]
    RouterClosed,
}

/// Result type for QA engine operations.
pub type QaResult<T> = std::result::Result<T, QaError>;
