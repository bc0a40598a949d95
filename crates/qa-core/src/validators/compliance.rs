//! Framework-tagged compliance checks.

use super::{CancelFlag, Findings, ValidatorKind};
use crate::domain::{ValidationContext, ValidationResult};
use crate::rules::{RuleCategory, RuleIndex};

/// Evaluates compliance rules for the frameworks listed in the context.
///
/// A rule fires when its trigger matches and its requirement is absent.
/// Rules for frameworks the context does not list are never evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceValidator;

impl ComplianceValidator {
    pub fn validate(&self, ctx: &ValidationContext, rules: &RuleIndex) -> ValidationResult {
        self.validate_cancellable(ctx, rules, &CancelFlag::default())
    }

    pub fn validate_cancellable(
        &self,
        ctx: &ValidationContext,
        rules: &RuleIndex,
        cancel: &CancelFlag,
    ) -> ValidationResult {
        let frameworks = ctx.frameworks();
        let mut findings = Findings::default();
        if frameworks.is_empty() {
            return findings.finish(ValidatorKind::Compliance);
        }

        let segments = ctx.scan_segments();
        for rule in rules.lookup_by_category(RuleCategory::Compliance) {
            if cancel.is_cancelled() {
                break;
            }
            let applicable: Vec<&str> = frameworks
                .iter()
                .map(String::as_str)
                .filter(|f| rule.has_framework(f))
                .collect();
            if applicable.is_empty() {
                continue;
            }
            if rule.matches(&segments, &ctx.payload).is_empty()
                || rule.requirement_met(&segments, &ctx.payload)
            {
                continue;
            }
            findings.violation(
                format!("[{}] {}: {}", applicable.join(","), rule.id, rule.message),
                rule.severity,
            );
            findings.rule_hit(rule);
        }

        findings.finish(ValidatorKind::Compliance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use serde_json::json;

    fn pii_payload() -> serde_json::Value {
        json!({
            "table": "customers",
            "columns": ["email", "full_name", "phone"],
            "storage": "postgres"
        })
    }

    #[test]
    fn test_gdpr_only_evaluates_gdpr_rules() {
        let ctx = ValidationContext::new("schema_change", pii_payload()).with_frameworks(&["GDPR"]);
        let r = ComplianceValidator.validate(&ctx, &RuleIndex::builtin());
        assert!(!r.passed);
        assert_eq!(r.severity, Severity::Critical);
        assert_eq!(r.violations.len(), 1);
        assert!(r.violations[0].starts_with("[GDPR] gdpr-data-encryption-at-rest"));
        assert_eq!(r.matched_rules, vec!["gdpr-data-encryption-at-rest".to_string()]);
    }

    #[test]
    fn test_encryption_marker_satisfies_rule() {
        let mut payload = pii_payload();
        payload["encryption"] = json!("aws:kms");
        let ctx = ValidationContext::new("schema_change", payload).with_frameworks(&["gdpr"]);
        assert!(ComplianceValidator.validate(&ctx, &RuleIndex::builtin()).passed);
    }

    #[test]
    fn test_disabled_encryption_does_not_satisfy_rule() {
        let ctx = ValidationContext::new(
            "schema_change",
            json!({"table": "customers", "columns": ["email", "phone"], "encrypted": false}),
        )
        .with_frameworks(&["GDPR"]);
        let r = ComplianceValidator.validate(&ctx, &RuleIndex::builtin());
        assert!(!r.passed);
        assert_eq!(r.matched_rules, vec!["gdpr-data-encryption-at-rest".to_string()]);

        let mut payload = pii_payload();
        payload["encryption"] = json!("none");
        let ctx = ValidationContext::new("schema_change", payload).with_frameworks(&["GDPR"]);
        assert!(!ComplianceValidator.validate(&ctx, &RuleIndex::builtin()).passed);
    }

    #[test]
    fn test_wildcard_role_in_json_member() {
        let ctx = ValidationContext::new("grant", json!({"user": "svc-report", "role": "admin"}))
            .with_frameworks(&["SOC2"]);
        let r = ComplianceValidator.validate(&ctx, &RuleIndex::builtin());
        assert!(r.matched_rules.contains(&"least-privilege-default".to_string()));
    }

    #[test]
    fn test_no_frameworks_means_nothing_evaluated() {
        let ctx = ValidationContext::new("schema_change", pii_payload());
        let r = ComplianceValidator.validate(&ctx, &RuleIndex::builtin());
        assert!(r.passed);
        assert!(r.violations.is_empty());
    }

    #[test]
    fn test_unknown_framework_is_skipped_silently() {
        let ctx = ValidationContext::new("schema_change", pii_payload())
            .with_frameworks(&["ISO-27001"]);
        assert!(ComplianceValidator.validate(&ctx, &RuleIndex::builtin()).passed);
    }

    #[test]
    fn test_multi_framework_rule_reports_listed_frameworks() {
        let ctx = ValidationContext::text("access", "SELECT * FROM patient WHERE id = ?")
            .with_frameworks(&["SOC2"]);
        let r = ComplianceValidator.validate(&ctx, &RuleIndex::builtin());
        assert_eq!(r.violations.len(), 1);
        assert!(r.violations[0].starts_with("[SOC2] audit-logging-required"));
    }
}
