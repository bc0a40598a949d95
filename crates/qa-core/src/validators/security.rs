//! Known-bad pattern scan over payload text.

use super::{CancelFlag, Findings, ValidatorKind};
use crate::domain::{ValidationContext, ValidationResult};
use crate::rules::{RuleCategory, RuleIndex};

/// Scans payloads against the security rules of the active snapshot.
///
/// Every occurrence of a pattern is a separate violation; suggestions are
/// kept once per distinct text. Text findings are located by line, or by JSON
/// pointer for structured payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityValidator;

impl SecurityValidator {
    pub fn validate(&self, ctx: &ValidationContext, rules: &RuleIndex) -> ValidationResult {
        self.validate_cancellable(ctx, rules, &CancelFlag::default())
    }

    /// Like [`SecurityValidator::validate`], stopping between rules once
    /// `cancel` is set.
    pub fn validate_cancellable(
        &self,
        ctx: &ValidationContext,
        rules: &RuleIndex,
        cancel: &CancelFlag,
    ) -> ValidationResult {
        let segments = ctx.scan_segments();
        let mut findings = Findings::default();

        for rule in rules.lookup_by_category(RuleCategory::Security) {
            if cancel.is_cancelled() {
                break;
            }
            let hits = rule.matches(&segments, &ctx.payload);
            if hits.is_empty() {
                continue;
            }
            for hit in hits {
                let violation = match hit.location() {
                    Some(at) => format!("{}: {} at {at}", rule.id, rule.message),
                    None => format!("{}: {}", rule.id, rule.message),
                };
                findings.violation(violation, rule.severity);
            }
            findings.rule_hit(rule);
        }

        findings.finish(ValidatorKind::Security)
    }
}
