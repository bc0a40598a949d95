//! Assembles the pipeline from an [`EngineConfig`].

use std::path::Path;
use std::sync::Arc;

use crate::audit::{AuditSink, FsAuditSink};
use crate::breaker::{BreakerRegistry, BreakerSnapshot};
use crate::config::EngineConfig;
use crate::coordinator::ExecutionCoordinator;
use crate::domain::{EventRegistry, QaResult, ValidationContext};
use crate::obs;
use crate::resolver::ActionResolver;
use crate::router::{EventRouter, OutcomeEvent, RouteOutcome, RouterHandle};
use crate::rules::{RuleIndex, RuleStore};
use crate::validators::{
    ComplianceValidator, EmbeddingProvider, SecurityValidator, SemanticValidator,
    StructuralValidator, ValidatorSet,
};

/// Builder for [`QaEngine`].
#[derive(Default)]
pub struct QaEngineBuilder {
    config: EngineConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    rules: Option<RuleIndex>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl QaEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use `rules` instead of loading the configured snapshot.
    pub fn rules(mut self, rules: RuleIndex) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the configuration and wire every component.
    ///
    /// Without a configured snapshot the built-in rules are used. A configured
    /// snapshot that cannot be read leaves the engine running on an empty index.
    pub fn build(self) -> QaResult<QaEngine> {
        self.config.validate()?;
        let registry = self.config.registry()?;

        let index = match self.rules {
            Some(index) => index,
            None => load_rules(self.config.rules.snapshot_path.as_deref()),
        };
        let rules = Arc::new(RuleStore::new(index));
        let breakers = Arc::new(BreakerRegistry::new(self.config.breaker));

        let mut semantic = SemanticValidator::new(self.config.semantic);
        if let Some(provider) = self.provider {
            semantic = semantic.with_provider(provider);
        }
        let validators = ValidatorSet::new(
            StructuralValidator::new(self.config.shapes.clone()),
            SecurityValidator,
            ComplianceValidator,
            semantic,
        );

        let coordinator = ExecutionCoordinator::new(
            validators,
            Arc::clone(&rules),
            Arc::clone(&breakers),
            ActionResolver::new(self.config.resolver),
        );

        let mut router =
            EventRouter::new(registry, coordinator).with_dimensions(self.config.dimensions.clone());
        if let Some(dir) = &self.config.audit.dir {
            router = router.with_sink(Arc::new(FsAuditSink::new(dir)));
        }
        for sink in self.sinks {
            router = router.with_sink(sink);
        }

        Ok(QaEngine {
            config: self.config,
            rules,
            breakers,
            router: Arc::new(router),
        })
    }
}

fn load_rules(path: Option<&Path>) -> RuleIndex {
    let Some(path) = path else {
        return RuleIndex::builtin();
    };
    match RuleIndex::load_path(path) {
        Ok(index) => index,
        Err(e) => {
            obs::emit_rules_unavailable(&path.display(), &e);
            RuleIndex::empty()
        }
    }
}

/// The assembled validation pipeline.
#[derive(Debug, Clone)]
pub struct QaEngine {
    config: EngineConfig,
    rules: Arc<RuleStore>,
    breakers: Arc<BreakerRegistry>,
    router: Arc<EventRouter>,
}

impl QaEngine {
    pub fn builder() -> QaEngineBuilder {
        QaEngineBuilder::default()
    }

    /// Engine with the default configuration and the built-in rules.
    pub fn with_defaults() -> QaResult<Self> {
        Self::builder().build()
    }

    pub fn from_config(config: EngineConfig) -> QaResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &EventRegistry {
        self.router.registry()
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn breakers(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Validate one context in the caller's task.
    pub async fn validate(&self, ctx: ValidationContext) -> QaResult<RouteOutcome> {
        self.router.route(ctx).await
    }

    /// Start the router actor.
    pub fn spawn_router(&self, capacity: usize) -> RouterHandle {
        Arc::clone(&self.router).spawn(capacity)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OutcomeEvent> {
        self.router.subscribe()
    }

    /// Reload the configured snapshot. Without a configured path this is a no-op
    /// returning the current index.
    pub fn reload_rules(&self) -> QaResult<Arc<RuleIndex>> {
        match &self.config.rules.snapshot_path {
            Some(path) => Ok(self.rules.reload_from_path(path)?),
            None => Ok(self.rules.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ConfigError, QaError};
    use crate::rules::RuleSnapshot;

    #[test]
    fn test_builtin_rules_without_snapshot_path() {
        let engine = QaEngine::with_defaults().unwrap();
        assert_eq!(engine.rules().snapshot().len(), RuleSnapshot::builtin().rules.len());
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_runs_on_empty_index() {
        let config = EngineConfig::from_toml_str(
            "[rules]\nsnapshot_path = \"/nonexistent/qa-rules.json\"\n",
        )
        .unwrap();
        let engine = QaEngine::from_config(config).unwrap();
        assert!(engine.rules().snapshot().is_empty());

        let outcome = engine
            .validate(ValidationContext::text("before_action", "password = \"hunter2\""))
            .await
            .unwrap();
        assert_eq!(outcome.action(), Action::None);
    }

    #[test]
    fn test_invalid_config_rejected_at_build() {
        let mut config = EngineConfig::default();
        config.breaker.failure_threshold = 0;
        assert!(matches!(
            QaEngine::builder().config(config).build(),
            Err(QaError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_default_engine_blocks_hardcoded_password() {
        let engine = QaEngine::with_defaults().unwrap();
        let outcome = engine
            .validate(ValidationContext::text("before_action", "password = \"hunter2\""))
            .await
            .unwrap();
        assert_eq!(outcome.action(), Action::Block);
    }

    #[test]
    fn test_reload_without_path_keeps_index() {
        let engine = QaEngine::with_defaults().unwrap();
        let before = engine.rules().snapshot();
        let after = engine.reload_rules().unwrap();
        assert_eq!(before.digest(), after.digest());
    }
}
