//! QA event definitions and the read-only event registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::validators::ValidatorKind;

/// Priority tier of a QA event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Definition of a validated lifecycle event.
///
/// Immutable once registered. `validators` holds names as supplied by the
/// event source; they are resolved to [`ValidatorKind`]s before any validator
/// runs so a misconfigured event fails up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaEvent {
    pub event_id: String,
    pub validators: Vec<String>,
    pub max_latency_ms: u64,
    #[serde(default)]
    pub block_on_fail: bool,
    #[serde(default)]
    pub priority: Priority,
    /// Circuit-open skips count as blocking failures.
    #[serde(default)]
    pub skip_blocks: bool,
    /// Timeouts count as blocking failures.
    #[serde(default = "default_true")]
    pub timeout_blocks: bool,
    /// Relative deadline weights keyed by validator name (default weight 1).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validator_weights: BTreeMap<String, u32>,
}

impl QaEvent {
    pub fn new<S: AsRef<str>>(event_id: &str, validators: &[S], max_latency_ms: u64) -> Self {
        Self {
            event_id: event_id.to_string(),
            validators: validators.iter().map(|v| v.as_ref().to_string()).collect(),
            max_latency_ms,
            block_on_fail: false,
            priority: Priority::default(),
            skip_blocks: false,
            timeout_blocks: true,
            validator_weights: BTreeMap::new(),
        }
    }

    pub fn with_block_on_fail(mut self, block_on_fail: bool) -> Self {
        self.block_on_fail = block_on_fail;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_skip_blocks(mut self, skip_blocks: bool) -> Self {
        self.skip_blocks = skip_blocks;
        self
    }

    pub fn with_timeout_blocks(mut self, timeout_blocks: bool) -> Self {
        self.timeout_blocks = timeout_blocks;
        self
    }

    pub fn with_weight(mut self, validator: &str, weight: u32) -> Self {
        self.validator_weights.insert(validator.to_string(), weight);
        self
    }

    /// Resolve validator names to kinds in canonical order, dropping duplicates.
    pub fn resolve_validators(&self) -> Result<Vec<ValidatorKind>, ConfigError> {
        let mut kinds = Vec::with_capacity(self.validators.len());
        for name in &self.validators {
            let kind: ValidatorKind =
                name.parse().map_err(|_| ConfigError::UnknownValidator {
                    event_id: self.event_id.clone(),
                    name: name.clone(),
                })?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds.sort();
        Ok(kinds)
    }

    /// Deadline weight for a validator.
    pub fn weight_of(&self, kind: ValidatorKind) -> u32 {
        self.validator_weights
            .get(kind.name())
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    /// Check the definition without running anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_id.trim().is_empty() {
            return Err(ConfigError::Invalid("event_id must not be empty".into()));
        }
        if self.max_latency_ms == 0 {
            return Err(ConfigError::ZeroLatency {
                event_id: self.event_id.clone(),
            });
        }
        self.resolve_validators()?;
        for name in self.validator_weights.keys() {
            name.parse::<ValidatorKind>()
                .map_err(|_| ConfigError::UnknownValidator {
                    event_id: self.event_id.clone(),
                    name: name.clone(),
                })?;
        }
        Ok(())
    }
}

/// Read-only registry of QA events keyed by event id.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    events: BTreeMap<String, QaEvent>,
}

impl EventRegistry {
    /// Build a registry, validating every definition.
    pub fn from_events(events: impl IntoIterator<Item = QaEvent>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for event in events {
            event.validate()?;
            if map.contains_key(&event.event_id) {
                return Err(ConfigError::DuplicateEvent(event.event_id));
            }
            map.insert(event.event_id.clone(), event);
        }
        Ok(Self { events: map })
    }

    pub fn get(&self, event_id: &str) -> Option<&QaEvent> {
        self.events.get(event_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QaEvent> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_validators_canonical_order_and_dedup() {
        let event = QaEvent::new(
            "pre_deploy",
            &["semantic", "security", "structural", "security"],
            100,
        );
        let kinds = event.resolve_validators().unwrap();
        assert_eq!(
            kinds,
            vec![
                ValidatorKind::Structural,
                ValidatorKind::Security,
                ValidatorKind::Semantic
            ]
        );
    }

    #[test]
    fn test_unknown_validator_is_config_error() {
        let event = QaEvent::new("pre_deploy", &["security", "linting"], 100);
        match event.resolve_validators() {
            Err(ConfigError::UnknownValidator { event_id, name }) => {
                assert_eq!(event_id, "pre_deploy");
                assert_eq!(name, "linting");
            }
            other => panic!("expected UnknownValidator, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_latency_rejected() {
        let event = QaEvent::new("e", &["security"], 0);
        assert!(matches!(
            event.validate(),
            Err(ConfigError::ZeroLatency { .. })
        ));
    }

    #[test]
    fn test_unknown_weight_key_rejected() {
        let event = QaEvent::new("e", &["security"], 10).with_weight("fuzzing", 3);
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let a = QaEvent::new("e", &["security"], 10);
        let b = QaEvent::new("e", &["compliance"], 10);
        assert!(matches!(
            EventRegistry::from_events(vec![a, b]),
            Err(ConfigError::DuplicateEvent(_))
        ));
    }

    #[test]
    fn test_event_defaults_from_json() {
        let event: QaEvent = serde_json::from_str(
            r#"{"event_id":"x","validators":["security"],"max_latency_ms":50}"#,
        )
        .unwrap();
        assert!(!event.block_on_fail);
        assert!(event.timeout_blocks);
        assert!(!event.skip_blocks);
        assert_eq!(event.priority, Priority::Normal);
    }
}
