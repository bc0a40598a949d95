//! Engine configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) yields a working
//! engine with the built-in rules and the three lifecycle events.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::domain::{ConfigError, EventRegistry, Priority, QaEvent};
use crate::resolver::ResolverConfig;
use crate::router::DimensionConfig;
use crate::validators::{SemanticConfig, Shape, ValidatorKind};

/// Path of the TOML configuration file.
pub const CONFIG_ENV: &str = "QA_ENGINE_CONFIG";

/// Overrides `[rules].snapshot_path`.
pub const RULES_ENV: &str = "QA_RULES_PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON rule snapshot; the built-in rules are used when unset.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory for the filesystem audit sink; disabled when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub breaker: BreakerConfig,
    pub resolver: ResolverConfig,
    pub semantic: SemanticConfig,
    pub rules: RulesConfig,
    pub audit: AuditConfig,
    pub events: Vec<QaEvent>,
    pub dimensions: BTreeMap<String, DimensionConfig>,
    /// Structural shapes keyed by event id.
    pub shapes: BTreeMap<String, Shape>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            resolver: ResolverConfig::default(),
            semantic: SemanticConfig::default(),
            rules: RulesConfig::default(),
            audit: AuditConfig::default(),
            events: default_events(),
            dimensions: BTreeMap::new(),
            shapes: BTreeMap::new(),
        }
    }
}

/// The lifecycle events registered when the configuration names none.
pub fn default_events() -> Vec<QaEvent> {
    vec![
        QaEvent::new("before_action", &["structural", "security"], 200)
            .with_block_on_fail(true)
            .with_priority(Priority::High),
        QaEvent::new("during_action", &["security"], 100).with_timeout_blocks(false),
        QaEvent::new(
            "after_action",
            &["structural", "security", "compliance", "semantic"],
            500,
        )
        .with_block_on_fail(true),
    ]
}

fn check_unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from [`CONFIG_ENV`] (defaults when unset) and apply [`RULES_ENV`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(
            std::env::var(CONFIG_ENV).ok().map(PathBuf::from),
            std::env::var(RULES_ENV).ok().map(PathBuf::from),
        )
    }

    /// Load from an optional config file, then apply an optional rules path override.
    pub fn from_sources(
        config_path: Option<PathBuf>,
        rules_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        if let Some(path) = rules_path {
            config.rules.snapshot_path = Some(path);
        }
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.semantic.top_k == 0 {
            return Err(ConfigError::Invalid("semantic.top_k must be positive".into()));
        }
        check_unit_interval("semantic.min_similarity", self.semantic.min_similarity)?;
        check_unit_interval(
            "resolver.auto_fix_confidence_threshold",
            self.resolver.auto_fix_confidence_threshold,
        )?;
        self.registry()?;
        for (name, dimension) in &self.dimensions {
            for validator in &dimension.validators {
                validator.parse::<ValidatorKind>().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "dimension {name} names unknown validator: {validator}"
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Registry of the configured events.
    pub fn registry(&self) -> Result<EventRegistry, ConfigError> {
        EventRegistry::from_events(self.events.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use std::io::Write;

    const SAMPLE: &str = r#"
[breaker]
failure_threshold = 5
cooldown_ms = 60000

[resolver]
auto_fix_confidence_threshold = 0.9

[rules]
snapshot_path = "rules/snapshot.json"

[[events]]
event_id = "pre_deploy"
validators = ["structural", "security", "compliance"]
max_latency_ms = 250
block_on_fail = true
priority = "critical"
skip_blocks = true

[events.validator_weights]
security = 2

[dimensions.deployment]
qa_required = true
validators = ["structural", "security"]
block_on_fail = true

[dimensions.docs]
qa_required = false

[shapes.pre_deploy]
severity = "high"

[shapes.pre_deploy.fields.service]
type = "string"

[shapes.pre_deploy.fields.replicas]
type = "integer"
required = false
"#;

    #[test]
    fn test_parse_full_sample() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.resolver.auto_fix_confidence_threshold, 0.9);
        assert_eq!(config.semantic, SemanticConfig::default());
        assert_eq!(config.events.len(), 1);

        let event = &config.events[0];
        assert_eq!(event.priority, Priority::Critical);
        assert!(event.skip_blocks);
        assert!(event.timeout_blocks);
        assert_eq!(event.weight_of(ValidatorKind::Security), 2);

        assert!(!config.dimensions["docs"].qa_required);
        assert!(config.dimensions["docs"].validators.is_empty());
        assert_eq!(config.shapes["pre_deploy"].severity, Severity::High);
        assert!(!config.shapes["pre_deploy"].fields["replicas"].required);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        let registry = config.registry().unwrap();
        assert!(registry.get("before_action").is_some());
        assert!(registry.get("during_action").is_some());
        assert!(registry.get("after_action").is_some());
    }

    #[test]
    fn test_unknown_validator_rejected() {
        let doc = r#"
[[events]]
event_id = "x"
validators = ["security", "spellcheck"]
max_latency_ms = 10
"#;
        assert!(matches!(
            EngineConfig::from_toml_str(doc),
            Err(ConfigError::UnknownValidator { .. })
        ));
    }

    #[test]
    fn test_bad_ranges_rejected() {
        assert!(EngineConfig::from_toml_str("[breaker]\nfailure_threshold = 0").is_err());
        assert!(EngineConfig::from_toml_str("[semantic]\nmin_similarity = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("[dimensions.d]\nvalidators = [\"nope\"]").is_err());
    }

    #[test]
    fn test_parse_error_surfaces() {
        assert!(matches!(
            EngineConfig::from_toml_str("[breaker"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_sources_applies_rules_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[breaker]\ncooldown_ms = 10\n").unwrap();

        let config = EngineConfig::from_sources(
            Some(file.path().to_path_buf()),
            Some(PathBuf::from("/tmp/rules.json")),
        )
        .unwrap();
        assert_eq!(config.breaker.cooldown_ms, 10);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(
            config.rules.snapshot_path,
            Some(PathBuf::from("/tmp/rules.json"))
        );
    }
}
