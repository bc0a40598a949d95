//! Embedding similarity against the rule store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Findings, ValidatorError, ValidatorKind};
use crate::domain::{ValidationContext, ValidationResult};
use crate::rules::{RuleIndex, DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};

/// Errors from an [`EmbeddingProvider`].
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("no embedding for event {0}")]
    Missing(String),
}

/// Source of payload embeddings.
///
/// The model behind it is outside the engine; implementations must return
/// vectors with the dimension of the active rule snapshot.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, ctx: &ValidationContext) -> Result<Vec<f32>, EmbeddingError>;
}

/// Provider returning fixed vectors keyed by event id.
#[derive(Debug, Clone, Default)]
pub struct FixedEmbeddingProvider {
    vectors: BTreeMap<String, Vec<f32>>,
    fallback: Option<Vec<f32>>,
}

impl FixedEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, event_id: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(event_id.to_string(), vector);
        self
    }

    pub fn with_fallback(mut self, vector: Vec<f32>) -> Self {
        self.fallback = Some(vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbeddingProvider {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn embed(&self, ctx: &ValidationContext) -> Result<Vec<f32>, EmbeddingError> {
        self.vectors
            .get(&ctx.event_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| EmbeddingError::Missing(ctx.event_id.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub top_k: usize,
    pub min_similarity: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

/// Flags payloads whose embedding lies close to an embedded rule.
#[derive(Clone, Default)]
pub struct SemanticValidator {
    config: SemanticConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl std::fmt::Debug for SemanticValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticValidator")
            .field("config", &self.config)
            .field("provider", &self.provider.as_ref().map(|p| p.model_name()))
            .finish()
    }
}

impl SemanticValidator {
    pub fn new(config: SemanticConfig) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    pub async fn validate(
        &self,
        ctx: &ValidationContext,
        rules: &RuleIndex,
    ) -> Result<ValidationResult, ValidatorError> {
        let kind = ValidatorKind::Semantic;
        let embedding = match (&ctx.embedding, &self.provider) {
            (Some(embedding), _) => embedding.clone(),
            (None, Some(provider)) => provider.embed(ctx).await?,
            (None, None) => return Ok(ValidationResult::pass(kind)),
        };

        let expected = rules.dimensions();
        if expected > 0 && embedding.len() != expected {
            return Err(ValidatorError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let mut findings = Findings::default();
        for (rule, similarity) in
            rules.nearest(&embedding, self.config.top_k, self.config.min_similarity)
        {
            findings.violation(
                format!("{}: {} (similarity {similarity:.3})", rule.id, rule.message),
                rule.severity,
            );
            findings.rule_hit(rule);
        }
        Ok(findings.finish(kind))
    }
}
