//! Validation outcomes: severities, per-validator results and the final action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validators::ValidatorKind;

/// Finding severity. Declaration order is the total order used for aggregation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Final disposition for an event.
///
/// Variant order is the resolution precedence: `block > auto_fix > warn > none`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    None,
    Warn,
    AutoFix,
    Block,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Warn => write!(f, "warn"),
            Self::AutoFix => write!(f, "auto_fix"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// How a validator's result came to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The validator ran to completion.
    #[default]
    Completed,
    /// Not invoked because its circuit breaker was open.
    Skipped,
    /// Exceeded its deadline.
    TimedOut,
    /// Returned an error.
    Errored,
    /// Panicked; caught at the coordinator boundary.
    Panicked,
}

/// An auto-fix offered by a matched rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixCandidate {
    pub rule_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub confidence: f64,
}

/// Result of one validator for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator: ValidatorKind,
    pub passed: bool,
    pub severity: Severity,
    /// Ordered violation descriptions.
    pub violations: Vec<String>,
    /// Remediation suggestions, deduplicated.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Ids of the rules that produced violations, in first-match order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_fixes: Vec<AutoFixCandidate>,
    /// Strongest action recommended by the matched rules.
    #[serde(default)]
    pub recommended_action: Action,
    #[serde(default)]
    pub status: ResultStatus,
    /// Operator-facing note for degraded or non-blocking synthetic results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ValidationResult {
    /// A clean pass with no findings.
    pub fn pass(validator: ValidatorKind) -> Self {
        Self {
            validator,
            passed: true,
            severity: Severity::Low,
            violations: Vec::new(),
            suggestions: Vec::new(),
            matched_rules: Vec::new(),
            auto_fixes: Vec::new(),
            recommended_action: Action::None,
            status: ResultStatus::Completed,
            note: None,
            duration_ms: 0,
        }
    }

    /// A synthetic failure carrying a single violation.
    pub fn failure(
        validator: ValidatorKind,
        severity: Severity,
        violation: impl Into<String>,
        status: ResultStatus,
    ) -> Self {
        Self {
            passed: false,
            severity,
            violations: vec![violation.into()],
            status,
            ..Self::pass(validator)
        }
    }

    /// Degraded result for a validator bypassed by an open circuit breaker.
    ///
    /// Non-blocking unless the event treats skips as blocking.
    pub fn skipped(validator: ValidatorKind, blocking: bool) -> Self {
        let note = format!("degraded: {validator} skipped while its circuit breaker is open");
        if blocking {
            Self {
                note: Some(note.clone()),
                ..Self::failure(validator, Severity::High, note, ResultStatus::Skipped)
            }
        } else {
            Self {
                status: ResultStatus::Skipped,
                note: Some(note),
                ..Self::pass(validator)
            }
        }
    }

    /// Synthetic result for a validator that missed its deadline.
    pub fn timed_out(validator: ValidatorKind, blocking: bool, limit_ms: u64) -> Self {
        if blocking {
            Self {
                note: Some(format!("exceeded {limit_ms}ms deadline")),
                duration_ms: limit_ms,
                ..Self::failure(validator, Severity::High, "timeout", ResultStatus::TimedOut)
            }
        } else {
            Self {
                status: ResultStatus::TimedOut,
                note: Some(format!(
                    "exceeded {limit_ms}ms deadline; timeout treated as non-blocking"
                )),
                duration_ms: limit_ms,
                ..Self::pass(validator)
            }
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Whether this result came from a degraded path rather than a completed run.
    pub fn is_degraded(&self) -> bool {
        self.status != ResultStatus::Completed
    }
}

/// Aggregated outcome of one invocation.
///
/// This is the record handed to audit sinks, the auto-fix executor and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub invocation_id: Uuid,
    pub event_id: String,
    pub passed: bool,
    /// Maximum severity across `results`.
    pub severity: Severity,
    /// One entry per invoked validator, in canonical validator order.
    pub results: Vec<ValidationResult>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Digest of the rule snapshot the invocation ran against.
    pub rules_digest: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Wire name of [`AggregatedResult`].
pub type ValidationResponse = AggregatedResult;

impl AggregatedResult {
    /// Total number of violations across all validators.
    pub fn violation_count(&self) -> usize {
        self.results.iter().map(|r| r.violations.len()).sum()
    }

    /// All violations in validator order.
    pub fn violations(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .flat_map(|r| r.violations.iter().map(String::as_str))
    }

    pub fn result_for(&self, validator: ValidatorKind) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.validator == validator)
    }

    /// Validators that were bypassed, timed out or crashed.
    pub fn degraded_validators(&self) -> Vec<ValidatorKind> {
        self.results
            .iter()
            .filter(|r| r.is_degraded())
            .map(|r| r.validator)
            .collect()
    }
}

/// Maximum severity of a set of results (`Low` when empty).
pub fn max_severity<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> Severity {
    results
        .into_iter()
        .map(|r| r.severity)
        .max()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_action_precedence() {
        assert!(Action::Block > Action::AutoFix);
        assert!(Action::AutoFix > Action::Warn);
        assert!(Action::Warn > Action::None);
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(serde_json::to_string(&Action::AutoFix).unwrap(), "\"auto_fix\"");
        assert_eq!(Action::AutoFix.to_string(), "auto_fix");
    }

    #[test]
    fn test_skipped_is_non_blocking_by_default() {
        let r = ValidationResult::skipped(ValidatorKind::Semantic, false);
        assert!(r.passed);
        assert!(r.violations.is_empty());
        assert_eq!(r.status, ResultStatus::Skipped);
        assert!(r.note.unwrap().contains("degraded"));
    }

    #[test]
    fn test_skipped_blocking_fails_high() {
        let r = ValidationResult::skipped(ValidatorKind::Semantic, true);
        assert!(!r.passed);
        assert_eq!(r.severity, Severity::High);
        assert_eq!(r.violations.len(), 1);
    }

    #[test]
    fn test_timed_out_shape() {
        let r = ValidationResult::timed_out(ValidatorKind::Security, true, 50);
        assert!(!r.passed);
        assert_eq!(r.severity, Severity::High);
        assert_eq!(r.violations, vec!["timeout".to_string()]);

        let r = ValidationResult::timed_out(ValidatorKind::Security, false, 50);
        assert!(r.passed);
        assert!(r.violations.is_empty());
        assert_eq!(r.status, ResultStatus::TimedOut);
    }

    #[test]
    fn test_max_severity_of_empty_is_low() {
        let empty: Vec<ValidationResult> = Vec::new();
        assert_eq!(max_severity(&empty), Severity::Low);
    }
}
