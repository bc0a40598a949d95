//! Resolves one action from a set of validator results.

use serde::{Deserialize, Serialize};

use crate::domain::{Action, AutoFixCandidate, QaEvent, Severity, ValidationResult};

/// Suggestion attached to a block when no validator offered one.
pub const FALLBACK_BLOCK_SUGGESTION: &str =
    "Resolve the reported violations and resubmit the event";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum confidence for an auto-fix to be offered.
    pub auto_fix_confidence_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_fix_confidence_threshold: 0.8,
        }
    }
}

/// Chosen action with its justification.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub action: Action,
    pub reason: Option<String>,
    pub suggestions: Vec<String>,
    /// Auto-fixes that cleared the confidence threshold.
    pub auto_fixes: Vec<AutoFixCandidate>,
}

/// Deterministic action resolver.
///
/// `block` when the event blocks on failure and a failing result is at least
/// high severity; otherwise `auto_fix` when a qualifying fix exists; otherwise
/// `warn` on any violation; otherwise `none`. Block always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionResolver {
    config: ResolverConfig,
}

impl ActionResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, event: &QaEvent, results: &[ValidationResult]) -> Resolution {
        let mut suggestions = Vec::new();
        for suggestion in results.iter().flat_map(|r| r.suggestions.iter()) {
            if !suggestions.contains(suggestion) {
                suggestions.push(suggestion.clone());
            }
        }

        let violation_count: usize = results.iter().map(|r| r.violations.len()).sum();

        let blocking: Vec<&ValidationResult> = if event.block_on_fail {
            results
                .iter()
                .filter(|r| !r.passed && r.severity >= Severity::High)
                .collect()
        } else {
            Vec::new()
        };

        if !blocking.is_empty() {
            if suggestions.is_empty() {
                suggestions.push(FALLBACK_BLOCK_SUGGESTION.to_string());
            }
            return Resolution {
                action: Action::Block,
                reason: Some(block_reason(&event.event_id, &blocking)),
                suggestions,
                auto_fixes: Vec::new(),
            };
        }

        let mut auto_fixes: Vec<AutoFixCandidate> = Vec::new();
        for fix in results.iter().flat_map(|r| r.auto_fixes.iter()) {
            if fix.confidence >= self.config.auto_fix_confidence_threshold
                && !auto_fixes.iter().any(|f| f.rule_id == fix.rule_id)
            {
                auto_fixes.push(fix.clone());
            }
        }

        if violation_count > 0 && !auto_fixes.is_empty() {
            let ids: Vec<&str> = auto_fixes.iter().map(|f| f.rule_id.as_str()).collect();
            for fix in &auto_fixes {
                if !suggestions.contains(&fix.description) {
                    suggestions.push(fix.description.clone());
                }
            }
            return Resolution {
                action: Action::AutoFix,
                reason: Some(format!("auto-fix available for {}", ids.join(", "))),
                suggestions,
                auto_fixes,
            };
        }

        if violation_count > 0 {
            return Resolution {
                action: Action::Warn,
                reason: Some(format!(
                    "{violation_count} non-blocking violation(s) on {}",
                    event.event_id
                )),
                suggestions,
                auto_fixes: Vec::new(),
            };
        }

        Resolution {
            action: Action::None,
            reason: None,
            suggestions,
            auto_fixes: Vec::new(),
        }
    }
}

fn block_reason(event_id: &str, blocking: &[&ValidationResult]) -> String {
    let parts: Vec<String> = blocking
        .iter()
        .map(|r| match r.violations.first() {
            Some(first) if r.violations.len() > 1 => format!(
                "{} ({}): {first} (+{} more)",
                r.validator,
                r.severity,
                r.violations.len() - 1
            ),
            Some(first) => format!("{} ({}): {first}", r.validator, r.severity),
            None => format!("{} ({})", r.validator, r.severity),
        })
        .collect();
    format!("{event_id} blocked by {}", parts.join("; "))
}
