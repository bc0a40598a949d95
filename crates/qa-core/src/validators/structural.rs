//! Shape conformance for structured payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Findings, ValidatorKind};
use crate::domain::{Severity, ValidationContext, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn default_required() -> bool {
    true
}

/// Expected shape of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Nested fields when `field_type` is `object`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldSpec>,
    /// Element shape when `field_type` is `array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSpec>>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            fields: BTreeMap::new(),
            items: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    pub fn with_items(mut self, spec: FieldSpec) -> Self {
        self.items = Some(Box::new(spec));
        self
    }
}

fn default_shape_severity() -> Severity {
    Severity::Medium
}

/// Registered shape for one event kind. The payload root must be an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(default = "default_shape_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            severity: default_shape_severity(),
            fields: BTreeMap::new(),
        }
    }
}

impl Shape {
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn check_fields(
    fields: &BTreeMap<String, FieldSpec>,
    object: &serde_json::Map<String, Value>,
    path: &str,
    out: &mut Vec<String>,
) {
    for (name, spec) in fields {
        let field_path = child_path(path, name);
        match object.get(name) {
            None | Some(Value::Null) if spec.required => {
                out.push(format!("{field_path}: missing required field"));
            }
            None | Some(Value::Null) => {}
            Some(value) => check_value(spec, value, &field_path, out),
        }
    }
}

fn check_value(spec: &FieldSpec, value: &Value, path: &str, out: &mut Vec<String>) {
    if !spec.field_type.accepts(value) {
        out.push(format!(
            "{path}: expected {}, found {}",
            spec.field_type.name(),
            json_type_name(value)
        ));
        return;
    }
    if let (Value::Object(object), false) = (value, spec.fields.is_empty()) {
        check_fields(&spec.fields, object, path, out);
    }
    if let (Value::Array(items), Some(item_spec)) = (value, &spec.items) {
        for (i, item) in items.iter().enumerate() {
            check_value(item_spec, item, &format!("{path}[{i}]"), out);
        }
    }
}

/// Checks payloads against the shape registered for their event id.
///
/// Events without a registered shape pass.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator {
    shapes: BTreeMap<String, Shape>,
}

impl StructuralValidator {
    pub fn new(shapes: BTreeMap<String, Shape>) -> Self {
        Self { shapes }
    }

    pub fn with_shape(mut self, event_id: &str, shape: Shape) -> Self {
        self.shapes.insert(event_id.to_string(), shape);
        self
    }

    pub fn shape_for(&self, event_id: &str) -> Option<&Shape> {
        self.shapes.get(event_id)
    }

    pub fn validate(&self, ctx: &ValidationContext) -> ValidationResult {
        let kind = ValidatorKind::Structural;
        let Some(shape) = self.shapes.get(&ctx.event_id) else {
            return ValidationResult::pass(kind);
        };

        let mut problems = Vec::new();
        match &ctx.payload {
            Value::Object(object) => check_fields(&shape.fields, object, "", &mut problems),
            other => problems.push(format!(
                "$: expected object, found {}",
                json_type_name(other)
            )),
        }

        let mut findings = Findings::default();
        for problem in problems {
            findings.violation(problem, shape.severity);
        }
        if !findings.is_empty() {
            findings.suggest(&format!(
                "Conform the {} payload to its registered shape",
                ctx.event_id
            ));
        }
        findings.finish(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deploy_shape() -> Shape {
        Shape::default()
            .with_field("service", FieldSpec::new(FieldType::String))
            .with_field("replicas", FieldSpec::new(FieldType::Integer))
            .with_field(
                "containers",
                FieldSpec::new(FieldType::Array).with_items(
                    FieldSpec::new(FieldType::Object)
                        .with_field("image", FieldSpec::new(FieldType::String)),
                ),
            )
            .with_field("labels", FieldSpec::new(FieldType::Object).optional())
    }

    fn validator() -> StructuralValidator {
        StructuralValidator::default().with_shape("deploy", deploy_shape())
    }

    #[test]
    fn test_no_shape_passes() {
        let ctx = ValidationContext::new("unregistered", json!("anything"));
        let r = validator().validate(&ctx);
        assert!(r.passed);
        assert!(r.violations.is_empty());
    }

    #[test]
    fn test_conforming_payload_passes() {
        let ctx = ValidationContext::new(
            "deploy",
            json!({"service": "api", "replicas": 3, "containers": [{"image": "api:1"}]}),
        );
        assert!(validator().validate(&ctx).passed);
    }

    #[test]
    fn test_violation_paths() {
        let ctx = ValidationContext::new(
            "deploy",
            json!({"replicas": "three", "containers": [{"image": "ok"}, {"image": 7}]}),
        );
        let r = validator().validate(&ctx);
        assert!(!r.passed);
        assert_eq!(r.severity, Severity::Medium);
        assert_eq!(
            r.violations,
            vec![
                "containers[1].image: expected string, found integer".to_string(),
                "replicas: expected integer, found string".to_string(),
                "service: missing required field".to_string(),
            ]
        );
        assert_eq!(r.suggestions.len(), 1);
    }

    #[test]
    fn test_non_object_root() {
        let ctx = ValidationContext::new("deploy", json!([1, 2]));
        let r = validator().validate(&ctx);
        assert_eq!(r.violations, vec!["$: expected object, found array".to_string()]);
    }

    #[test]
    fn test_shape_from_toml_like_json() {
        let shape: Shape = serde_json::from_value(json!({
            "severity": "high",
            "fields": {"id": {"type": "integer"}, "note": {"type": "string", "required": false}}
        }))
        .unwrap();
        assert_eq!(shape.severity, Severity::High);
        assert!(!shape.fields["note"].required);
    }
}
