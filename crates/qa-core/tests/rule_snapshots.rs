//! Loading, degrading and hot-swapping rule snapshots through the engine.

use std::path::Path;
use std::sync::Arc;

use qa_core::{
    Action, EngineConfig, FixedEmbeddingProvider, QaEngine, QaError, RuleCategory,
    ValidationContext, ValidatorKind,
};
use serde_json::json;

fn write_snapshot(path: &Path, value: serde_json::Value) {
    std::fs::write(path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
}

fn first_snapshot() -> serde_json::Value {
    json!({
        "model": {"name": "fixed", "dimensions": 3},
        "rules": [
            {"id": "todo-marker", "category": "security", "pattern": "\\bTODO\\b",
             "severity": "medium", "message": "unfinished code"},
            {"id": "bad-severity", "category": "security", "pattern": "x",
             "severity": "extreme"},
            {"id": "god-object", "category": "architecture", "severity": "high",
             "message": "class accumulates unrelated responsibilities",
             "embedding": [1.0, 0.0, 0.0]}
        ]
    })
}

fn engine_for(path: &Path) -> QaEngine {
    let doc = format!(
        r#"
[rules]
snapshot_path = "{}"

[[events]]
event_id = "review"
validators = ["security", "semantic"]
max_latency_ms = 500
block_on_fail = true
"#,
        path.display()
    );
    QaEngine::builder()
        .config(EngineConfig::from_toml_str(&doc).unwrap())
        .embedding_provider(Arc::new(
            FixedEmbeddingProvider::new().with_fallback(vec![0.99, 0.05, 0.0]),
        ))
        .build()
        .unwrap()
}

#[tokio::test]
async fn malformed_entries_are_skipped_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    write_snapshot(&path, first_snapshot());
    let engine = engine_for(&path);

    let index = engine.rules().snapshot();
    assert_eq!(index.len(), 2);
    assert_eq!(index.skipped().len(), 1);
    assert_eq!(index.skipped()[0].id.as_deref(), Some("bad-severity"));
    assert_eq!(index.degraded_categories(), vec![RuleCategory::Security]);

    let result = engine
        .validate(ValidationContext::text("review", "// TODO split this class"))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let security = result.result_for(ValidatorKind::Security).unwrap();
    assert_eq!(security.matched_rules, vec!["todo-marker".to_string()]);
    let semantic = result.result_for(ValidatorKind::Semantic).unwrap();
    assert_eq!(semantic.matched_rules, vec!["god-object".to_string()]);
    assert_eq!(result.action, Action::Block);
    assert_eq!(result.rules_digest, index.digest());
}

#[tokio::test]
async fn reload_swaps_rules_for_later_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    write_snapshot(&path, first_snapshot());
    let engine = engine_for(&path);
    let before = engine.rules().snapshot();

    write_snapshot(
        &path,
        json!({
            "model": {"name": "fixed", "dimensions": 3},
            "rules": [
                {"id": "todo-marker", "category": "security", "pattern": "\\bTODO\\b",
                 "severity": "low", "message": "unfinished code"}
            ]
        }),
    );
    let after = engine.reload_rules().unwrap();
    assert_ne!(before.digest(), after.digest());
    // The previous snapshot is still intact for whoever holds it.
    assert_eq!(before.len(), 2);

    let result = engine
        .validate(ValidationContext::text("review", "// TODO split this class"))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(result.rules_digest, after.digest());
    assert_eq!(result.action, Action::Warn);
    assert!(result
        .result_for(ValidatorKind::Semantic)
        .unwrap()
        .matched_rules
        .is_empty());
}

#[tokio::test]
async fn failed_reload_keeps_previous_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    write_snapshot(&path, first_snapshot());
    let engine = engine_for(&path);
    let before = engine.rules().snapshot();

    std::fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(engine.reload_rules(), Err(QaError::RuleLoad(_))));
    assert_eq!(engine.rules().snapshot().digest(), before.digest());
}
