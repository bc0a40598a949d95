//! Compiled, read-only rule index.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::RuleLoadError;
use super::similarity::cosine_similarity;
use super::snapshot::{
    AutoFixSpec, ModelSpec, PatternSpec, RawSnapshot, RuleCategory, RuleSnapshot, RuleSpec,
};
use crate::domain::scan::affirms;
use crate::domain::{Action, ScanSegment, Severity};

#[derive(Debug, Clone)]
enum Matcher {
    /// Empty pattern: the rule applies unconditionally.
    Always,
    Text(Regex),
    Field {
        pointer: String,
        equals: Option<Value>,
    },
}

/// Condition whose presence satisfies a rule.
#[derive(Debug, Clone)]
enum Requirement {
    /// Regex over segment text or pointer; only segments that affirm count.
    Marker(Regex),
    Field {
        pointer: String,
        equals: Option<Value>,
    },
}

/// One place a rule matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// JSON pointer of the matched member in a structured payload.
    pub path: Option<String>,
    /// 1-based line, for plain text and multi-line members.
    pub line: Option<usize>,
}

impl RuleMatch {
    const WHOLE: RuleMatch = RuleMatch {
        path: None,
        line: None,
    };

    /// Human-readable location, e.g. `line 3`, `/diff` or `/diff line 2`.
    pub fn location(&self) -> Option<String> {
        let path = self.path.as_deref().filter(|p| !p.is_empty());
        match (path, self.line) {
            (Some(path), Some(line)) => Some(format!("{path} line {line}")),
            (Some(path), None) => Some(path.to_string()),
            (None, Some(line)) => Some(format!("line {line}")),
            (None, None) => None,
        }
    }
}

fn check_pointer(pointer: &str) -> Result<(), String> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(format!("field matcher must be a JSON pointer: {pointer}"))
    }
}

/// Append every match of `re` in `segment`.
///
/// Matches arrive in order, so newlines are counted once across the segment.
fn text_matches(re: &Regex, segment: &ScanSegment, out: &mut Vec<RuleMatch>) {
    let text = segment.text.as_bytes();
    let report_lines = segment.path.is_none() || segment.text.contains('\n');
    let mut line = 1;
    let mut counted = 0;
    for m in re.find_iter(&segment.text) {
        line += text[counted..m.start()].iter().filter(|&&b| b == b'\n').count();
        counted = m.start();
        out.push(RuleMatch {
            path: segment.path.clone(),
            line: report_lines.then_some(line),
        });
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: RuleCategory,
    pub severity: Severity,
    /// Action the rule recommends; surfaced on results that match it.
    pub action: Action,
    pub message: String,
    pub suggestion: Option<String>,
    pub frameworks: Vec<String>,
    pub auto_fix: Option<AutoFixSpec>,
    pub embedding: Option<Vec<f32>>,
    matcher: Matcher,
    requires: Option<Requirement>,
}

impl Rule {
    fn compile(spec: RuleSpec) -> Result<Self, String> {
        let matcher = match spec.pattern {
            PatternSpec::Text(p) if p.is_empty() => Matcher::Always,
            PatternSpec::Text(p) => {
                Matcher::Text(Regex::new(&p).map_err(|e| format!("invalid pattern: {e}"))?)
            }
            PatternSpec::Field { field, equals } => {
                check_pointer(&field)?;
                Matcher::Field {
                    pointer: field,
                    equals,
                }
            }
        };
        let requires = match spec.requires {
            None => None,
            Some(PatternSpec::Text(p)) if p.is_empty() => None,
            Some(PatternSpec::Text(p)) => Some(Requirement::Marker(
                Regex::new(&p).map_err(|e| format!("invalid requires marker: {e}"))?,
            )),
            Some(PatternSpec::Field { field, equals }) => {
                check_pointer(&field)?;
                Some(Requirement::Field {
                    pointer: field,
                    equals,
                })
            }
        };
        if let Some(fix) = &spec.auto_fix {
            if !(0.0..=1.0).contains(&fix.confidence) {
                return Err(format!(
                    "auto_fix confidence {} outside [0, 1]",
                    fix.confidence
                ));
            }
        }
        Ok(Self {
            id: spec.id,
            category: spec.category,
            severity: spec.severity,
            action: spec.action,
            message: spec.message,
            suggestion: spec.suggestion,
            frameworks: spec.frameworks,
            auto_fix: spec.auto_fix,
            embedding: spec.embedding,
            matcher,
            requires,
        })
    }

    /// Every match of this rule against a payload.
    ///
    /// Text patterns yield one entry per occurrence across `segments`; field
    /// and unconditional matchers yield at most one.
    pub fn matches(&self, segments: &[ScanSegment], payload: &Value) -> Vec<RuleMatch> {
        match &self.matcher {
            Matcher::Always => vec![RuleMatch::WHOLE],
            Matcher::Text(re) => {
                let mut out = Vec::new();
                for segment in segments {
                    text_matches(re, segment, &mut out);
                }
                out
            }
            Matcher::Field { pointer, equals } => match (payload.pointer(pointer), equals) {
                (Some(found), Some(expected)) if found == expected => vec![RuleMatch {
                    path: Some(pointer.clone()),
                    line: None,
                }],
                (Some(_), None) => vec![RuleMatch {
                    path: Some(pointer.clone()),
                    line: None,
                }],
                _ => Vec::new(),
            },
        }
    }

    /// Whether the rule's requirement is present (vacuously true without one).
    ///
    /// A marker only counts on members whose value turns it on, so
    /// `"encrypted": false` does not satisfy an encryption marker.
    pub fn requirement_met(&self, segments: &[ScanSegment], payload: &Value) -> bool {
        match &self.requires {
            None => true,
            Some(Requirement::Marker(re)) => segments.iter().any(|s| {
                s.affirms
                    && (re.is_match(&s.text) || s.path.as_deref().is_some_and(|p| re.is_match(p)))
            }),
            Some(Requirement::Field { pointer, equals }) => {
                match (payload.pointer(pointer), equals) {
                    (Some(found), Some(expected)) => found == expected,
                    (Some(found), None) => affirms(found),
                    (None, _) => false,
                }
            }
        }
    }

    pub fn has_framework(&self, framework: &str) -> bool {
        self.frameworks
            .iter()
            .any(|f| f.eq_ignore_ascii_case(framework))
    }
}

/// A snapshot entry that was dropped during loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRule {
    pub id: Option<String>,
    pub category: Option<RuleCategory>,
    pub reason: String,
}

/// Immutable index over a loaded snapshot.
///
/// Rules live in a single arena in snapshot order; category and embedding
/// lookups index into it.
#[derive(Debug, Clone)]
pub struct RuleIndex {
    model: ModelSpec,
    rules: Vec<Rule>,
    by_category: BTreeMap<RuleCategory, Vec<usize>>,
    embedded: Vec<usize>,
    skipped: Vec<SkippedRule>,
    digest: String,
    loaded_at: DateTime<Utc>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl RuleIndex {
    /// An index with no rules.
    pub fn empty() -> Self {
        Self::build(ModelSpec::default(), Vec::new(), sha256_hex(b""))
    }

    /// Parse and compile a JSON snapshot.
    ///
    /// Fails only when the top level is malformed. Entries that do not parse,
    /// do not compile, duplicate an earlier id or carry an embedding of the
    /// wrong dimension are skipped and recorded in [`RuleIndex::skipped`].
    pub fn load(bytes: &[u8]) -> Result<Self, RuleLoadError> {
        let raw: RawSnapshot = serde_json::from_slice(bytes)?;
        Ok(Self::build(raw.model, raw.rules, sha256_hex(bytes)))
    }

    pub fn load_path(path: &Path) -> Result<Self, RuleLoadError> {
        let bytes = std::fs::read(path).map_err(|source| RuleLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load(&bytes)
    }

    pub fn from_snapshot(snapshot: &RuleSnapshot) -> Self {
        let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
        let entries = snapshot
            .rules
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect();
        Self::build(snapshot.model.clone(), entries, sha256_hex(&bytes))
    }

    pub fn builtin() -> Self {
        Self::from_snapshot(&RuleSnapshot::builtin())
    }

    fn build(model: ModelSpec, entries: Vec<Value>, digest: String) -> Self {
        let mut index = Self {
            model,
            rules: Vec::with_capacity(entries.len()),
            by_category: BTreeMap::new(),
            embedded: Vec::new(),
            skipped: Vec::new(),
            digest,
            loaded_at: Utc::now(),
        };
        let mut seen = BTreeSet::new();

        for entry in entries {
            let id = entry.get("id").and_then(Value::as_str).map(str::to_string);
            let category = entry
                .get("category")
                .and_then(Value::as_str)
                .and_then(|c| c.parse().ok());

            let spec: RuleSpec = match serde_json::from_value(entry) {
                Ok(spec) => spec,
                Err(e) => {
                    index.skip(id, category, format!("malformed entry: {e}"));
                    continue;
                }
            };
            if !seen.insert(spec.id.clone()) {
                index.skip(id, category, "duplicate rule id".to_string());
                continue;
            }
            if let Some(embedding) = &spec.embedding {
                if index.model.dimensions == 0 {
                    index.model.dimensions = embedding.len();
                }
                if embedding.len() != index.model.dimensions {
                    let reason = format!(
                        "embedding has {} dimensions, model {} expects {}",
                        embedding.len(),
                        index.model.name,
                        index.model.dimensions
                    );
                    index.skip(id, category, reason);
                    continue;
                }
            }
            match Rule::compile(spec) {
                Ok(rule) => {
                    let slot = index.rules.len();
                    index.by_category.entry(rule.category).or_default().push(slot);
                    if rule.embedding.is_some() {
                        index.embedded.push(slot);
                    }
                    index.rules.push(rule);
                }
                Err(reason) => index.skip(id, category, reason),
            }
        }

        for skipped in &index.skipped {
            tracing::warn!(
                event = "qa.rules.entry_skipped",
                rule_id = skipped.id.as_deref().unwrap_or("<unknown>"),
                category = skipped.category.map(RuleCategory::name).unwrap_or("<unknown>"),
                reason = %skipped.reason,
            );
        }
        index
    }

    fn skip(&mut self, id: Option<String>, category: Option<RuleCategory>, reason: String) {
        self.skipped.push(SkippedRule {
            id,
            category,
            reason,
        });
    }

    /// Rules of one category, in snapshot order.
    pub fn lookup_by_category(&self, category: RuleCategory) -> Vec<&Rule> {
        self.by_category
            .get(&category)
            .map(|slots| slots.iter().map(|&i| &self.rules[i]).collect())
            .unwrap_or_default()
    }

    /// Nearest embedded rules to `embedding`.
    ///
    /// Sorted by similarity descending (ties by snapshot order), filtered by
    /// `threshold` and truncated to `k`.
    pub fn nearest(&self, embedding: &[f32], k: usize, threshold: f64) -> Vec<(&Rule, f64)> {
        let mut hits: Vec<(usize, f64)> = self
            .embedded
            .iter()
            .filter_map(|&slot| {
                let vector = self.rules[slot].embedding.as_deref()?;
                let similarity = cosine_similarity(embedding, vector);
                (similarity >= threshold).then_some((slot, similarity))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        hits.into_iter()
            .map(|(slot, similarity)| (&self.rules[slot], similarity))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    /// Embedding dimension expected by the index (0 when no rule is embedded).
    pub fn dimensions(&self) -> usize {
        self.model.dimensions
    }

    pub fn skipped(&self) -> &[SkippedRule] {
        &self.skipped
    }

    /// Categories that lost at least one entry while loading.
    pub fn degraded_categories(&self) -> Vec<RuleCategory> {
        let set: BTreeSet<RuleCategory> =
            self.skipped.iter().filter_map(|s| s.category).collect();
        set.into_iter().collect()
    }

    /// Rule counts per category, for reporting.
    pub fn category_counts(&self) -> BTreeMap<RuleCategory, usize> {
        self.by_category
            .iter()
            .map(|(category, slots)| (*category, slots.len()))
            .collect()
    }

    /// SHA-256 hex digest of the snapshot this index was built from.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
