//! Wire format of a rule snapshot and the built-in rule set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Action, Severity};

/// Rule category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    Security,
    Compliance,
    TechDebt,
    Architecture,
    Performance,
    Testing,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 6] = [
        Self::Security,
        Self::Compliance,
        Self::TechDebt,
        Self::Architecture,
        Self::Performance,
        Self::Testing,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Compliance => "compliance",
            Self::TechDebt => "tech-debt",
            Self::Architecture => "architecture",
            Self::Performance => "performance",
            Self::Testing => "testing",
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for RuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown rule category: {s}"))
    }
}

/// Matcher definition: a regex over payload text, or a structural check on a
/// JSON pointer into the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Text(String),
    Field {
        /// JSON pointer, e.g. `/securityContext/privileged`.
        field: String,
        /// Fires when the field equals this value; presence alone when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        equals: Option<Value>,
    },
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixSpec {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Confidence in `[0, 1]` that the fix is correct.
    pub confidence: f64,
}

fn default_action() -> Action {
    Action::Warn
}

/// One rule entry as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub category: RuleCategory,
    #[serde(default)]
    pub pattern: PatternSpec,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_action")]
    pub action: Action,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Compliance frameworks this rule belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frameworks: Vec<String>,
    /// What satisfies the rule (compliance only): a marker regex, matched
    /// against members whose value turns it on, or a field matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<PatternSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<AutoFixSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Embedding model the snapshot's vectors were produced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// Fixed vector length; 0 means no embedded rules.
    #[serde(default)]
    pub dimensions: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            name: "none".to_string(),
            dimensions: 0,
        }
    }
}

/// A full rule snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    #[serde(default)]
    pub model: ModelSpec,
    pub rules: Vec<RuleSpec>,
}

/// Loosely-typed snapshot used during loading so one bad entry does not
/// reject the whole file.
#[derive(Debug, Deserialize)]
pub(crate) struct RawSnapshot {
    #[serde(default)]
    pub model: ModelSpec,
    pub rules: Vec<Value>,
}

fn rule(
    id: &str,
    category: RuleCategory,
    pattern: &str,
    severity: Severity,
    message: &str,
    suggestion: &str,
) -> RuleSpec {
    RuleSpec {
        id: id.to_string(),
        category,
        pattern: PatternSpec::Text(pattern.to_string()),
        severity,
        action: if severity >= Severity::High {
            Action::Block
        } else {
            Action::Warn
        },
        message: message.to_string(),
        suggestion: Some(suggestion.to_string()),
        frameworks: Vec::new(),
        requires: None,
        auto_fix: None,
        embedding: None,
    }
}

fn compliance(
    id: &str,
    frameworks: &[&str],
    pattern: &str,
    requires: Option<&str>,
    severity: Severity,
    message: &str,
    suggestion: &str,
) -> RuleSpec {
    RuleSpec {
        frameworks: frameworks.iter().map(|f| f.to_string()).collect(),
        requires: requires.map(|r| PatternSpec::Text(r.to_string())),
        ..rule(
            id,
            RuleCategory::Compliance,
            pattern,
            severity,
            message,
            suggestion,
        )
    }
}

const ENCRYPTION_MARKER: &str = r"(?i)(?:encrypt|kms|aes-?256|sse-)";

impl RuleSnapshot {
    /// Built-in security and compliance rules used when no snapshot is configured.
    pub fn builtin() -> Self {
        use RuleCategory::Security;
        use Severity::{Critical, High, Low, Medium};

        let mut weak_randomness = rule(
            "weak-randomness",
            Security,
            r"(?:\bMath\.random\s*\(|\brandom\.(?:random|randint|choice)\s*\()",
            Medium,
            "non-cryptographic random number generator",
            "Use a cryptographically secure generator for tokens and identifiers",
        );
        weak_randomness.auto_fix = Some(AutoFixSpec {
            description: "replace with a cryptographically secure generator".to_string(),
            replacement: Some("secrets.token_hex()".to_string()),
            confidence: 0.9,
        });

        let privileged = RuleSpec {
            pattern: PatternSpec::Field {
                field: "/securityContext/privileged".to_string(),
                equals: Some(Value::Bool(true)),
            },
            ..rule(
                "privileged-container",
                Security,
                "",
                High,
                "container requests privileged mode",
                "Drop privileged mode and grant only the capabilities required",
            )
        };

        let rules = vec![
            rule(
                "hardcoded-password",
                Security,
                r#"(?i)\b(?:password|passwd|pwd)["']?\s*[:=]\s*["'][^"'\s]{3,}["']"#,
                Critical,
                "hardcoded password",
                "Load credentials from a secret manager or environment variable",
            ),
            rule(
                "hardcoded-api-key",
                Security,
                r#"(?i)\b(?:api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token)["']?\s*[:=]\s*["'][A-Za-z0-9_\-./+]{16,}["']"#,
                Critical,
                "hardcoded API key or token",
                "Load credentials from a secret manager or environment variable",
            ),
            rule(
                "private-key-material",
                Security,
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
                Critical,
                "private key material in payload",
                "Remove the key and rotate it; reference it from a secret store",
            ),
            rule(
                "aws-access-key",
                Security,
                r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
                Critical,
                "AWS access key id",
                "Remove the key and rotate it; reference it from a secret store",
            ),
            rule(
                "shell-command-concatenation",
                Security,
                r#"\b(?:os\.system|os\.popen|execSync|child_process\.exec)\s*\(\s*(?:["'][^"']*["']\s*\+|f["']|[A-Za-z_][A-Za-z0-9_.]*\s*\+)"#,
                High,
                "command built by string concatenation",
                "Pass arguments as a list instead of interpolating into a shell command",
            ),
            rule(
                "subprocess-shell-true",
                Security,
                r"\bshell\s*=\s*True\b",
                High,
                "subprocess invoked through a shell",
                "Pass arguments as a list instead of interpolating into a shell command",
            ),
            rule(
                "sql-concatenation",
                Security,
                r#"(?i)(?:["'](?:SELECT|INSERT|UPDATE|DELETE)\b[^"']*["']\s*(?:\+|%|\.format\s*\()|\bf["'](?:SELECT|INSERT|UPDATE|DELETE)\b[^"']*\{)"#,
                High,
                "SQL query built by string concatenation",
                "Use parameterised queries",
            ),
            rule(
                "eval-usage",
                Security,
                r"\beval\s*\(",
                High,
                "dynamic code evaluation",
                "Avoid eval; parse the input explicitly",
            ),
            rule(
                "unsafe-html-rendering",
                Security,
                r"(?:\.innerHTML\s*=|\bdangerouslySetInnerHTML\b|\bdocument\.write\s*\(|\|\s*safe\b)",
                Medium,
                "unescaped HTML rendering",
                "Escape untrusted content or use a templating API that escapes by default",
            ),
            weak_randomness,
            rule(
                "insecure-deserialization",
                Security,
                r"\b(?:pickle\.loads?|yaml\.load|marshal\.loads)\s*\(",
                Medium,
                "deserialization of untrusted data",
                "Use a safe loader or a data-only format such as JSON",
            ),
            rule(
                "tls-verification-disabled",
                Security,
                r"(?:\bverify\s*=\s*False\b|\brejectUnauthorized\s*:\s*false\b|\bInsecureSkipVerify\s*:\s*true\b|\bdanger_accept_invalid_certs\s*\(\s*true\s*\))",
                High,
                "TLS certificate verification disabled",
                "Keep certificate verification enabled",
            ),
            rule(
                "debug-statement",
                Security,
                r"(?:\bconsole\.(?:log|debug|trace)\s*\(|\bSystem\.out\.println\s*\(|\bdebugger\s*;|\bvar_dump\s*\(|\bdbg!\s*\()",
                Low,
                "debug statement left in code",
                "Remove debug output or route it through the structured logger",
            ),
            privileged,
            compliance(
                "gdpr-data-encryption-at-rest",
                &["GDPR"],
                r"(?i)\b(?:email|e-mail|phone|ssn|date_of_birth|dob|full_name|home_address|passport)\b",
                Some(ENCRYPTION_MARKER),
                Critical,
                "personal data stored without encryption at rest",
                "Enable encryption at rest (KMS or AES-256) for stores holding personal data",
            ),
            compliance(
                "hipaa-phi-encryption",
                &["HIPAA"],
                r"(?i)\b(?:patient|diagnosis|medical_record|mrn|health_record)\b",
                Some(ENCRYPTION_MARKER),
                Critical,
                "protected health information stored without encryption",
                "Encrypt PHI at rest and in transit",
            ),
            compliance(
                "audit-logging-required",
                &["HIPAA", "SOC2"],
                r"(?i)\b(?:patient|medical_record|customer|account|admin)\b",
                Some(r"(?i)\baudit"),
                High,
                "sensitive data access without audit logging",
                "Enable audit logging for every access to sensitive records",
            ),
            compliance(
                "least-privilege-default",
                &["SOC2"],
                r#"(?i)(?:"(?:role|permissions?|scope)"\s*:\s*"(?:\*|admin|root|all)"|"action"\s*:\s*"\*")"#,
                None,
                High,
                "wildcard or administrative permission granted by default",
                "Grant the narrowest role that satisfies the use case",
            ),
            compliance(
                "pci-dss-card-data",
                &["PCI-DSS"],
                r"(?i)\b(?:card_number|cardnumber|pan|cvv|cvc)\b",
                Some(r"(?i)(?:tokeni[sz]|encrypt|vault)"),
                Critical,
                "cardholder data handled without tokenization",
                "Tokenize card data and keep raw PANs out of application storage",
            ),
        ];

        Self {
            model: ModelSpec::default(),
            rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_names() {
        assert_eq!(
            serde_json::to_string(&RuleCategory::TechDebt).unwrap(),
            "\"tech-debt\""
        );
        assert_eq!("tech-debt".parse::<RuleCategory>(), Ok(RuleCategory::TechDebt));
        assert!("style".parse::<RuleCategory>().is_err());
    }

    #[test]
    fn test_pattern_spec_untagged() {
        let text: PatternSpec = serde_json::from_str(r#""\\beval\\(""#).unwrap();
        assert!(matches!(text, PatternSpec::Text(_)));

        let field: PatternSpec =
            serde_json::from_str(r#"{"field":"/a/b","equals":true}"#).unwrap();
        assert_eq!(
            field,
            PatternSpec::Field {
                field: "/a/b".to_string(),
                equals: Some(Value::Bool(true)),
            }
        );
    }

    #[test]
    fn test_rule_spec_defaults() {
        let spec: RuleSpec =
            serde_json::from_str(r#"{"id":"r","category":"testing"}"#).unwrap();
        assert_eq!(spec.severity, Severity::Low);
        assert_eq!(spec.action, Action::Warn);
        assert_eq!(spec.pattern, PatternSpec::Text(String::new()));
    }

    #[test]
    fn test_requires_accepts_marker_or_field() {
        let marker: RuleSpec = serde_json::from_str(
            r#"{"id":"r","category":"compliance","requires":"(?i)encrypt"}"#,
        )
        .unwrap();
        assert_eq!(marker.requires, Some(PatternSpec::Text("(?i)encrypt".to_string())));

        let field: RuleSpec = serde_json::from_str(
            r#"{"id":"r","category":"compliance","requires":{"field":"/encrypted","equals":true}}"#,
        )
        .unwrap();
        assert!(matches!(field.requires, Some(PatternSpec::Field { .. })));
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let snapshot = RuleSnapshot::builtin();
        let mut ids: Vec<&str> = snapshot.rules.iter().map(|r| r.id.as_str()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }
}
