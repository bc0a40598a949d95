//! Maps incoming events to their definitions and drives the coordinator.
//!
//! The router can be used directly with [`EventRouter::route`] or run as an
//! actor with [`EventRouter::spawn`]: requests then travel over an `mpsc`
//! channel with a `oneshot` reply, and follow-up [`OutcomeEvent`]s are
//! published on a `broadcast` channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::coordinator::ExecutionCoordinator;
use crate::domain::{
    Action, AggregatedResult, EventRegistry, QaError, QaEvent, QaResult, Severity,
    ValidationContext,
};
use crate::obs;

/// Capacity of the follow-up event channel.
pub const OUTCOME_CHANNEL_CAPACITY: usize = 256;

fn default_true() -> bool {
    true
}

/// Per-domain QA policy, selected by the context's `dimension` metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConfig {
    #[serde(default = "default_true")]
    pub qa_required: bool,
    /// Replaces the event's validator list when non-empty.
    #[serde(default)]
    pub validators: Vec<String>,
    /// Combined with the event's own flag; either one enables blocking.
    #[serde(default)]
    pub block_on_fail: bool,
}

impl Default for DimensionConfig {
    fn default() -> Self {
        Self {
            qa_required: true,
            validators: Vec::new(),
            block_on_fail: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    #[serde(rename = "qa.passed")]
    Passed,
    #[serde(rename = "qa.warned")]
    Warned,
    #[serde(rename = "qa.blocked")]
    Blocked,
    #[serde(rename = "qa.auto_fix")]
    AutoFix,
    #[serde(rename = "qa.not_required")]
    NotRequired,
}

impl OutcomeKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Passed => "qa.passed",
            Self::Warned => "qa.warned",
            Self::Blocked => "qa.blocked",
            Self::AutoFix => "qa.auto_fix",
            Self::NotRequired => "qa.not_required",
        }
    }

    fn from_action(action: Action) -> Self {
        match action {
            Action::None => Self::Passed,
            Action::Warn => Self::Warned,
            Action::AutoFix => Self::AutoFix,
            Action::Block => Self::Blocked,
        }
    }
}

/// Follow-up event describing how an invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub kind: OutcomeKind,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeEvent {
    fn from_result(result: &AggregatedResult, dimension: Option<&str>) -> Self {
        Self {
            kind: OutcomeKind::from_action(result.action),
            event_id: result.event_id.clone(),
            invocation_id: Some(result.invocation_id),
            severity: Some(result.severity),
            reason: result.reason.clone(),
            dimension: dimension.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    fn not_required(event_id: &str, dimension: &str) -> Self {
        Self {
            kind: OutcomeKind::NotRequired,
            event_id: event_id.to_string(),
            invocation_id: None,
            severity: None,
            reason: None,
            dimension: Some(dimension.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// What routing one context produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Validated(AggregatedResult),
    /// The context's dimension does not require QA; nothing ran.
    NotRequired { event_id: String, dimension: String },
}

impl RouteOutcome {
    pub fn result(&self) -> Option<&AggregatedResult> {
        match self {
            Self::Validated(result) => Some(result),
            Self::NotRequired { .. } => None,
        }
    }

    pub fn into_result(self) -> Option<AggregatedResult> {
        match self {
            Self::Validated(result) => Some(result),
            Self::NotRequired { .. } => None,
        }
    }

    pub fn action(&self) -> Action {
        self.result().map_or(Action::None, |r| r.action)
    }
}

/// Routes contexts to the coordinator.
pub struct EventRouter {
    registry: EventRegistry,
    dimensions: BTreeMap<String, DimensionConfig>,
    coordinator: ExecutionCoordinator,
    sinks: Vec<Arc<dyn AuditSink>>,
    outcomes: broadcast::Sender<OutcomeEvent>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("EventRouter")
            .field("events", &self.registry.len())
            .field("dimensions", &self.dimensions.keys().collect::<Vec<_>>())
            .field("sinks", &sinks)
            .finish()
    }
}

impl EventRouter {
    pub fn new(registry: EventRegistry, coordinator: ExecutionCoordinator) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            registry,
            dimensions: BTreeMap::new(),
            coordinator,
            sinks: Vec::new(),
            outcomes,
        }
    }

    pub fn with_dimensions(mut self, dimensions: BTreeMap<String, DimensionConfig>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn dimensions(&self) -> &BTreeMap<String, DimensionConfig> {
        &self.dimensions
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.outcomes.subscribe()
    }

    /// Effective event definition for `ctx`, or `None` when its dimension
    /// does not require QA.
    ///
    /// A dimension the router does not know leaves the event unchanged.
    pub fn plan(&self, ctx: &ValidationContext) -> QaResult<Option<QaEvent>> {
        let event = self
            .registry
            .get(&ctx.event_id)
            .ok_or_else(|| QaError::UnknownEvent(ctx.event_id.clone()))?;

        let Some(dimension) = ctx.dimension().and_then(|d| self.dimensions.get(d)) else {
            return Ok(Some(event.clone()));
        };
        if !dimension.qa_required {
            return Ok(None);
        }

        let mut effective = event.clone();
        if !dimension.validators.is_empty() {
            effective.validators = dimension.validators.clone();
        }
        effective.block_on_fail |= dimension.block_on_fail;
        effective.validate()?;
        Ok(Some(effective))
    }

    /// Validate one context, hand the result to every sink and publish the
    /// follow-up event.
    pub async fn route(&self, ctx: ValidationContext) -> QaResult<RouteOutcome> {
        let Some(event) = self.plan(&ctx)? else {
            let dimension = ctx.dimension().unwrap_or_default().to_string();
            obs::emit_event_not_required(&ctx.event_id, &dimension);
            self.publish(OutcomeEvent::not_required(&ctx.event_id, &dimension));
            return Ok(RouteOutcome::NotRequired {
                event_id: ctx.event_id,
                dimension,
            });
        };

        let dimension = ctx.dimension().map(str::to_string);
        let result = self.coordinator.run(&event, Arc::new(ctx)).await?;
        for sink in &self.sinks {
            if let Err(e) = sink.record(&result).await {
                obs::emit_audit_failed(sink.name(), &result.invocation_id, &e);
            }
        }
        self.publish(OutcomeEvent::from_result(&result, dimension.as_deref()));
        Ok(RouteOutcome::Validated(result))
    }

    fn publish(&self, event: OutcomeEvent) {
        // No subscribers is fine.
        let _ = self.outcomes.send(event);
    }

    /// Run the router as an actor.
    ///
    /// At most `capacity` requests are queued and at most `capacity`
    /// invocations run at once. The actor stops when every handle is dropped.
    pub fn spawn(self: Arc<Self>, capacity: usize) -> RouterHandle {
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<RouteRequest>(capacity);
        let outcomes = self.outcomes.clone();
        let in_flight = Arc::new(Semaphore::new(capacity));

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else {
                    break;
                };
                let router = Arc::clone(&self);
                tokio::spawn(async move {
                    let outcome = router.route(request.ctx).await;
                    let _ = request.reply.send(outcome);
                    drop(permit);
                });
            }
        });

        RouterHandle { tx, outcomes }
    }
}

struct RouteRequest {
    ctx: ValidationContext,
    reply: oneshot::Sender<QaResult<RouteOutcome>>,
}

/// Cloneable handle to a running router actor.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouteRequest>,
    outcomes: broadcast::Sender<OutcomeEvent>,
}

impl std::fmt::Debug for RouterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl RouterHandle {
    /// Submit a context and wait for its outcome.
    pub async fn submit(&self, ctx: ValidationContext) -> QaResult<RouteOutcome> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RouteRequest { ctx, reply })
            .await
            .map_err(|_| QaError::RouterClosed)?;
        response.await.map_err(|_| QaError::RouterClosed)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.outcomes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::domain::ConfigError;
    use crate::resolver::ActionResolver;
    use crate::rules::{RuleIndex, RuleStore};
    use crate::validators::ValidatorSet;
    use serde_json::json;

    fn router() -> EventRouter {
        let registry = EventRegistry::from_events(vec![QaEvent::new(
            "pre_commit",
            &["security"],
            200,
        )])
        .unwrap();
        let coordinator = ExecutionCoordinator::new(
            ValidatorSet::default(),
            Arc::new(RuleStore::new(RuleIndex::builtin())),
            Arc::new(BreakerRegistry::default()),
            ActionResolver::default(),
        );
        let mut dimensions = BTreeMap::new();
        dimensions.insert(
            "docs".to_string(),
            DimensionConfig {
                qa_required: false,
                ..DimensionConfig::default()
            },
        );
        dimensions.insert(
            "secrets-handling".to_string(),
            DimensionConfig {
                qa_required: true,
                validators: vec!["security".into(), "compliance".into()],
                block_on_fail: true,
            },
        );
        dimensions.insert(
            "broken".to_string(),
            DimensionConfig {
                validators: vec!["fuzzing".into()],
                ..DimensionConfig::default()
            },
        );
        EventRouter::new(registry, coordinator).with_dimensions(dimensions)
    }

    #[test]
    fn test_plan_unknown_event() {
        let ctx = ValidationContext::new("nope", json!({}));
        assert!(matches!(router().plan(&ctx), Err(QaError::UnknownEvent(_))));
    }

    #[test]
    fn test_plan_dimension_overrides() {
        let r = router();
        let ctx = ValidationContext::new("pre_commit", json!({})).with_dimension("secrets-handling");
        let plan = r.plan(&ctx).unwrap().unwrap();
        assert!(plan.block_on_fail);
        assert_eq!(plan.validators, vec!["security", "compliance"]);

        let ctx = ValidationContext::new("pre_commit", json!({})).with_dimension("docs");
        assert!(r.plan(&ctx).unwrap().is_none());

        let ctx = ValidationContext::new("pre_commit", json!({})).with_dimension("unlisted");
        assert!(!r.plan(&ctx).unwrap().unwrap().block_on_fail);
    }

    #[test]
    fn test_plan_bad_dimension_validator_is_config_error() {
        let ctx = ValidationContext::new("pre_commit", json!({})).with_dimension("broken");
        assert!(matches!(
            router().plan(&ctx),
            Err(QaError::Config(ConfigError::UnknownValidator { .. }))
        ));
    }

    #[tokio::test]
    async fn test_route_publishes_outcome() {
        let r = router();
        let mut events = r.subscribe();
        let ctx = ValidationContext::text("pre_commit", "console.log(x)");
        let outcome = r.route(ctx).await.unwrap();
        assert_eq!(outcome.action(), Action::Warn);

        let published = events.recv().await.unwrap();
        assert_eq!(published.kind, OutcomeKind::Warned);
        assert_eq!(
            published.invocation_id,
            outcome.result().map(|r| r.invocation_id)
        );
    }

    #[tokio::test]
    async fn test_route_not_required() {
        let r = router();
        let mut events = r.subscribe();
        let ctx = ValidationContext::text("pre_commit", "password=\"admin123\"").with_dimension("docs");
        let outcome = r.route(ctx).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::NotRequired { .. }));
        assert_eq!(events.recv().await.unwrap().kind, OutcomeKind::NotRequired);
    }

    #[test]
    fn test_outcome_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&OutcomeKind::AutoFix).unwrap(),
            "\"qa.auto_fix\""
        );
        assert_eq!(OutcomeKind::Blocked.name(), "qa.blocked");
    }
}
