//! Payload flattening for pattern scans.
//!
//! Plain-text payloads are scanned as one segment. Structured payloads are
//! walked leaf by leaf so string values are matched unescaped and findings
//! can be reported by JSON pointer.

use serde_json::Value;

/// Values that switch a setting off rather than on.
const DISABLING_WORDS: [&str; 8] = [
    "false",
    "no",
    "none",
    "off",
    "disabled",
    "unencrypted",
    "plaintext",
    "null",
];

/// One scannable piece of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSegment {
    /// JSON pointer of the leaf; `None` for a plain-text payload.
    pub path: Option<String>,
    /// Text seen by pattern rules: `"key": value` for object members, the raw
    /// value otherwise. String values are never escaped.
    pub text: String,
    /// Whether the value turns its key on. `false`, `null`, `0`, empty strings,
    /// words such as `"none"` and container keys do not.
    pub affirms: bool,
}

impl ScanSegment {
    fn plain(text: &str) -> Self {
        Self {
            path: None,
            text: text.to_string(),
            affirms: true,
        }
    }
}

/// Flatten `payload` into scan segments in document order.
pub fn scan_segments(payload: &Value) -> Vec<ScanSegment> {
    match payload {
        Value::String(s) => vec![ScanSegment::plain(s)],
        other => {
            let mut out = Vec::new();
            walk("", None, other, &mut out);
            out
        }
    }
}

fn escape_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn walk(prefix: &str, key: Option<&str>, value: &Value, out: &mut Vec<ScanSegment>) {
    match value {
        Value::Object(map) => {
            if let Some(key) = key {
                out.push(ScanSegment {
                    path: Some(prefix.to_string()),
                    text: format!("\"{key}\":"),
                    affirms: false,
                });
            }
            for (k, v) in map {
                let next = format!("{prefix}/{}", escape_token(k));
                walk(&next, Some(k), v, out);
            }
        }
        Value::Array(items) => {
            if let Some(key) = key {
                out.push(ScanSegment {
                    path: Some(prefix.to_string()),
                    text: format!("\"{key}\":"),
                    affirms: false,
                });
            }
            // Items inherit the key of the member holding the array.
            for (idx, v) in items.iter().enumerate() {
                let next = format!("{prefix}/{idx}");
                match v {
                    Value::Object(_) | Value::Array(_) => walk(&next, None, v, out),
                    leaf => out.push(leaf_segment(next, key, leaf)),
                }
            }
        }
        leaf => out.push(leaf_segment(prefix.to_string(), key, leaf)),
    }
}

fn leaf_segment(path: String, key: Option<&str>, value: &Value) -> ScanSegment {
    let rendered = match value {
        Value::String(s) => match key {
            Some(_) => format!("\"{s}\""),
            None => s.clone(),
        },
        other => other.to_string(),
    };
    let text = match key {
        Some(key) => format!("\"{key}\": {rendered}"),
        None => rendered,
    };
    ScanSegment {
        path: Some(path),
        text,
        affirms: affirms(value),
    }
}

/// Whether a JSON value turns a setting on.
pub(crate) fn affirms(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !DISABLING_WORDS.iter().any(|w| s.eq_ignore_ascii_case(w))
        }
        Value::Array(_) | Value::Object(_) => false,
    }
}
