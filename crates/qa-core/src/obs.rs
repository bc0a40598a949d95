//! Structured observability hooks for QA invocations.
//!
//! This module provides:
//! - Invocation-scoped tracing spans via [`invocation_span`]
//! - Emission functions for invocation start/finish, validator degradation,
//!   breaker transitions and rule-store changes
//!
//! Events are emitted at `info!` (degradations at `warn!`). Filter with
//! `RUST_LOG`; pass `--json` to the CLI for newline-delimited JSON.

use tracing::{info, warn};
use uuid::Uuid;

use crate::breaker::Transition;
use crate::domain::AggregatedResult;
use crate::rules::RuleCategory;
use crate::validators::ValidatorKind;

/// Span tagged with the event and invocation ids.
///
/// Attach it to the invocation future with [`tracing::Instrument`]; the span
/// then follows the work across `.await` points and into validator tasks.
pub fn invocation_span(event_id: &str, invocation_id: &Uuid) -> tracing::Span {
    tracing::info_span!("qa.invocation", event_id = %event_id, invocation_id = %invocation_id)
}

/// Emit event: invocation started.
///
/// ```ignore
/// emit_invocation_started("pre_deploy", &id, &[ValidatorKind::Security], 200);
/// // logs: event=qa.invocation.started event_id=pre_deploy validators=security ...
/// ```
pub fn emit_invocation_started(
    event_id: &str,
    invocation_id: &Uuid,
    validators: &[ValidatorKind],
    max_latency_ms: u64,
) {
    let names: Vec<&str> = validators.iter().map(|v| v.name()).collect();
    info!(
        event = "qa.invocation.started",
        event_id = %event_id,
        invocation_id = %invocation_id,
        validators = %names.join(","),
        max_latency_ms = max_latency_ms,
    );
}

/// Emit event: invocation finished with its action and severity.
pub fn emit_invocation_finished(result: &AggregatedResult) {
    let degraded: Vec<&str> = result
        .degraded_validators()
        .into_iter()
        .map(ValidatorKind::name)
        .collect();
    info!(
        event = "qa.invocation.finished",
        event_id = %result.event_id,
        invocation_id = %result.invocation_id,
        passed = result.passed,
        severity = %result.severity,
        action = %result.action,
        violations = result.violation_count() as u64,
        degraded = %degraded.join(","),
        duration_ms = result.duration_ms,
    );
}

/// Emit event: a validator was bypassed because its breaker is open.
pub fn emit_validator_skipped(event_id: &str, validator: ValidatorKind, consecutive_failures: u32) {
    warn!(
        event = "qa.validator.skipped",
        event_id = %event_id,
        validator = %validator,
        consecutive_failures = consecutive_failures,
    );
}

/// Emit event: a validator missed its deadline.
pub fn emit_validator_timeout(event_id: &str, validator: ValidatorKind, limit_ms: u64) {
    warn!(
        event = "qa.validator.timeout",
        event_id = %event_id,
        validator = %validator,
        limit_ms = limit_ms,
    );
}

/// Emit event: a validator returned an error or panicked.
pub fn emit_validator_failed(
    event_id: &str,
    validator: ValidatorKind,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "qa.validator.failed",
        event_id = %event_id,
        validator = %validator,
        error = %error,
    );
}

/// Emit event: a circuit breaker changed state.
pub fn emit_breaker_transition(transition: &Transition) {
    warn!(
        event = "qa.breaker.transition",
        validator = %transition.validator,
        from = %transition.from,
        to = %transition.to,
        consecutive_failures = transition.consecutive_failures,
    );
}

/// Emit event: a rule index became active.
pub fn emit_rules_loaded(digest: &str, rules: usize, skipped: usize) {
    info!(
        event = "qa.rules.loaded",
        digest = %digest,
        rules = rules as u64,
        skipped = skipped as u64,
    );
}

/// Emit event: the active index is missing entries in some categories.
pub fn emit_rules_degraded(categories: &[RuleCategory]) {
    let names: Vec<&str> = categories.iter().map(|c| c.name()).collect();
    warn!(event = "qa.rules.degraded", categories = %names.join(","));
}

/// Emit event: a new rule index replaced the previous one.
pub fn emit_rules_swapped(previous_digest: &str, digest: &str) {
    info!(
        event = "qa.rules.swapped",
        previous_digest = %previous_digest,
        digest = %digest,
    );
}

/// Emit event: a snapshot could not be loaded (warning level).
pub fn emit_rules_reload_failed(source: &dyn std::fmt::Display, error: &dyn std::fmt::Display) {
    warn!(event = "qa.rules.load_failed", source = %source, error = %error);
}

/// Emit event: the configured snapshot failed to load and the engine starts
/// with an empty index (warning level).
pub fn emit_rules_unavailable(source: &dyn std::fmt::Display, error: &dyn std::fmt::Display) {
    warn!(event = "qa.rules.unavailable", source = %source, error = %error);
}

/// Emit event: an event was routed but its dimension does not require QA.
pub fn emit_event_not_required(event_id: &str, dimension: &str) {
    info!(event = "qa.route.not_required", event_id = %event_id, dimension = %dimension);
}

/// Emit event: an audit sink rejected a result (warning level).
pub fn emit_audit_failed(sink: &str, invocation_id: &Uuid, error: &dyn std::fmt::Display) {
    warn!(
        event = "qa.audit.failed",
        sink = %sink,
        invocation_id = %invocation_id,
        error = %error,
    );
}
