//! The closed set of validators.
//!
//! Each validator inspects a [`ValidationContext`] against a rule snapshot and
//! returns a [`ValidationResult`]. Validators hold only immutable
//! configuration; all runtime state lives in the coordinator.

pub mod compliance;
pub mod security;
pub mod semantic;
pub mod structural;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinError;

use crate::domain::{
    Action, AutoFixCandidate, ResultStatus, Severity, ValidationContext, ValidationResult,
};
use crate::rules::{Rule, RuleIndex};

pub use compliance::ComplianceValidator;
pub use security::SecurityValidator;
pub use semantic::{
    EmbeddingError, EmbeddingProvider, FixedEmbeddingProvider, SemanticConfig, SemanticValidator,
};
pub use structural::{FieldSpec, FieldType, Shape, StructuralValidator};

/// Validator kinds. Declaration order is the canonical invocation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    Structural,
    Security,
    Compliance,
    Semantic,
}

impl ValidatorKind {
    pub const ALL: [ValidatorKind; 4] = [
        Self::Structural,
        Self::Security,
        Self::Compliance,
        Self::Semantic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Security => "security",
            Self::Compliance => "compliance",
            Self::Semantic => "semantic",
        }
    }

    /// Position in [`ValidatorKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ValidatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown validator: {s}"))
    }
}

/// Errors a validator can surface. The coordinator converts every one of
/// these into a synthetic result; none escapes an invocation.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding has {actual} dimensions, rule index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("validator exceeded its {limit_ms}ms deadline")]
    Timeout { limit_ms: u64 },

    #[error("validator panicked: {message}")]
    Panicked { message: String },

    #[error("validator task was cancelled")]
    Cancelled,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl From<JoinError> for ValidatorError {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            Self::Panicked {
                message: panic_message(payload.as_ref()),
            }
        } else {
            Self::Cancelled
        }
    }
}

impl ValidatorError {
    /// Synthetic result standing in for a validator that failed to produce one.
    ///
    /// Errors and panics fail closed at critical severity.
    pub fn into_result(self, kind: ValidatorKind, timeout_blocks: bool) -> ValidationResult {
        match self {
            Self::Timeout { limit_ms } => ValidationResult::timed_out(kind, timeout_blocks, limit_ms),
            Self::Panicked { message } => ValidationResult::failure(
                kind,
                Severity::Critical,
                format!("{kind} validator crashed: {message}"),
                ResultStatus::Panicked,
            ),
            other => ValidationResult::failure(
                kind,
                Severity::Critical,
                format!("{kind} validator error: {other}"),
                ResultStatus::Errored,
            ),
        }
    }
}

/// Set once the coordinator stops waiting for an invocation. Long scans
/// check it between rules and stop early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Validators that only do CPU work; they run on the blocking pool.
#[derive(Debug)]
pub enum BlockingValidator {
    Structural(StructuralValidator),
    Security(SecurityValidator),
    Compliance(ComplianceValidator),
}

impl BlockingValidator {
    fn validate(
        &self,
        ctx: &ValidationContext,
        rules: &RuleIndex,
        cancel: &CancelFlag,
    ) -> ValidationResult {
        match self {
            Self::Structural(v) => v.validate(ctx),
            Self::Security(v) => v.validate_cancellable(ctx, rules, cancel),
            Self::Compliance(v) => v.validate_cancellable(ctx, rules, cancel),
        }
    }
}

/// One validator instance.
#[derive(Debug)]
pub enum Validator {
    Blocking(Arc<BlockingValidator>),
    Semantic(SemanticValidator),
}

impl Validator {
    pub fn kind(&self) -> ValidatorKind {
        match self {
            Self::Blocking(v) => match v.as_ref() {
                BlockingValidator::Structural(_) => ValidatorKind::Structural,
                BlockingValidator::Security(_) => ValidatorKind::Security,
                BlockingValidator::Compliance(_) => ValidatorKind::Compliance,
            },
            Self::Semantic(_) => ValidatorKind::Semantic,
        }
    }

    /// Run the validator.
    ///
    /// CPU-bound validators go through `spawn_blocking`, so the caller's
    /// timeout stays live on any runtime flavor. A panic on the blocking pool
    /// comes back as [`ValidatorError::Panicked`].
    pub async fn validate(
        &self,
        ctx: Arc<ValidationContext>,
        rules: Arc<RuleIndex>,
        cancel: CancelFlag,
    ) -> Result<ValidationResult, ValidatorError> {
        match self {
            Self::Semantic(v) => v.validate(&ctx, &rules).await,
            Self::Blocking(v) => {
                let v = Arc::clone(v);
                Ok(tokio::task::spawn_blocking(move || v.validate(&ctx, &rules, &cancel)).await?)
            }
        }
    }
}

/// One instance of every validator kind.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    slots: [Arc<Validator>; 4],
}

impl ValidatorSet {
    pub fn new(
        structural: StructuralValidator,
        security: SecurityValidator,
        compliance: ComplianceValidator,
        semantic: SemanticValidator,
    ) -> Self {
        Self {
            slots: [
                Arc::new(Validator::Blocking(Arc::new(BlockingValidator::Structural(
                    structural,
                )))),
                Arc::new(Validator::Blocking(Arc::new(BlockingValidator::Security(security)))),
                Arc::new(Validator::Blocking(Arc::new(BlockingValidator::Compliance(
                    compliance,
                )))),
                Arc::new(Validator::Semantic(semantic)),
            ],
        }
    }

    pub fn get(&self, kind: ValidatorKind) -> Arc<Validator> {
        Arc::clone(&self.slots[kind.index()])
    }
}

impl Default for ValidatorSet {
    fn default() -> Self {
        Self::new(
            StructuralValidator::default(),
            SecurityValidator,
            ComplianceValidator,
            SemanticValidator::default(),
        )
    }
}

/// Accumulates findings from matched rules into a result.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    violations: Vec<String>,
    suggestions: Vec<String>,
    matched_rules: Vec<String>,
    auto_fixes: Vec<AutoFixCandidate>,
    severity: Option<Severity>,
    recommended: Action,
}

impl Findings {
    pub(crate) fn violation(&mut self, text: String, severity: Severity) {
        self.violations.push(text);
        self.severity = Some(self.severity.map_or(severity, |s| s.max(severity)));
    }

    /// Record a rule match: its suggestion, auto-fix and id are kept once.
    pub(crate) fn rule_hit(&mut self, rule: &Rule) {
        self.recommended = self.recommended.max(rule.action);
        if !self.matched_rules.iter().any(|id| id == &rule.id) {
            self.matched_rules.push(rule.id.clone());
        }
        if let Some(suggestion) = &rule.suggestion {
            self.suggest(suggestion);
        }
        if let Some(fix) = &rule.auto_fix {
            if !self.auto_fixes.iter().any(|f| f.rule_id == rule.id) {
                self.auto_fixes.push(AutoFixCandidate {
                    rule_id: rule.id.clone(),
                    description: fix.description.clone(),
                    replacement: fix.replacement.clone(),
                    confidence: fix.confidence,
                });
            }
        }
    }

    pub(crate) fn suggest(&mut self, suggestion: &str) {
        if !self.suggestions.iter().any(|s| s == suggestion) {
            self.suggestions.push(suggestion.to_string());
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub(crate) fn finish(self, kind: ValidatorKind) -> ValidationResult {
        let passed = self.violations.is_empty();
        ValidationResult {
            passed,
            severity: self.severity.unwrap_or_default(),
            violations: self.violations,
            suggestions: self.suggestions,
            matched_rules: self.matched_rules,
            auto_fixes: self.auto_fixes,
            recommended_action: self.recommended,
            ..ValidationResult::pass(kind)
        }
    }
}
