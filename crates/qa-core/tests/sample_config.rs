//! The shipped sample configuration and rule snapshot stay loadable.

use std::path::{Path, PathBuf};

use qa_core::{Action, EngineConfig, QaEngine, RuleCategory, ValidationContext};
use serde_json::json;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn sample_engine() -> QaEngine {
    let root = workspace_root();
    let config = EngineConfig::from_sources(
        Some(root.join("config/qa-engine.toml")),
        Some(root.join("config/rules.json")),
    )
    .unwrap_or_else(|e| panic!("sample config should load: {e}"));
    QaEngine::builder().config(config).build().unwrap()
}

#[test]
fn sample_snapshot_loads_without_skips() {
    let engine = sample_engine();
    let index = engine.rules().snapshot();
    assert!(index.skipped().is_empty(), "skipped: {:?}", index.skipped());
    assert_eq!(index.dimensions(), 4);
    assert_eq!(index.lookup_by_category(RuleCategory::Security).len(), 4);
}

#[tokio::test]
async fn sample_pre_deploy_blocks_privileged_container() {
    let engine = sample_engine();
    let ctx = ValidationContext::new(
        "pre_deploy",
        json!({
            "service": "billing",
            "image": "registry.local/billing:1.4.2",
            "securityContext": {"privileged": true}
        }),
    );
    let result = engine.validate(ctx).await.unwrap().into_result().unwrap();
    assert_eq!(result.action, Action::Block);
    assert!(result.violations().any(|v| v.starts_with("privileged-container")));
}

#[tokio::test]
async fn sample_documentation_dimension_skips_qa() {
    let engine = sample_engine();
    let outcome = engine
        .validate(ValidationContext::text("after_action", "eval(x)").with_dimension("documentation"))
        .await
        .unwrap();
    assert!(outcome.result().is_none());
}
