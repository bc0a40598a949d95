//! QA Engine Core Library
//!
//! Real-time validation of lifecycle events: a versioned rule store, four
//! validators run under a latency budget with per-validator circuit breakers,
//! and deterministic resolution of one action per invocation.

pub mod audit;
pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod metrics;
pub mod obs;
pub mod resolver;
pub mod router;
pub mod rules;
pub mod telemetry;
pub mod validators;

pub use audit::{AuditError, AuditSink, FsAuditSink, MemoryAuditSink};
pub use breaker::{
    Admission, BreakerConfig, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker,
    Transition,
};
pub use config::{EngineConfig, CONFIG_ENV, RULES_ENV};
pub use coordinator::{allocate_budgets, ExecutionCoordinator};
pub use domain::{
    Action, AggregatedResult, AutoFixCandidate, ConfigError, EventRegistry, Priority, QaError,
    QaEvent, QaResult, ResultStatus, ScanSegment, Severity, ValidationContext, ValidationRequest,
    ValidationResponse, ValidationResult,
};
pub use engine::{QaEngine, QaEngineBuilder};
pub use metrics::{MetricsSnapshot, METRICS};
pub use resolver::{ActionResolver, Resolution, ResolverConfig};
pub use router::{
    DimensionConfig, EventRouter, OutcomeEvent, OutcomeKind, RouteOutcome, RouterHandle,
};
pub use rules::{RuleCategory, RuleIndex, RuleLoadError, RuleSnapshot, RuleStore};
pub use telemetry::init_tracing;
pub use validators::{
    CancelFlag, EmbeddingError, EmbeddingProvider, FixedEmbeddingProvider, SemanticConfig, Shape,
    ValidatorError, ValidatorKind,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
