//! Bounded-latency fan-out of validators for one invocation.
//!
//! Every admitted validator runs in its own task with a per-validator
//! deadline. Results come back over a channel and are slotted into canonical
//! validator order; whatever has not arrived by the overall deadline is
//! recorded as a timeout, its task is aborted and its scan is cancelled.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::breaker::{Admission, BreakerRegistry};
use crate::domain::{
    max_severity, Action, AggregatedResult, ConfigError, QaEvent, ValidationContext,
    ValidationResult,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::resolver::ActionResolver;
use crate::rules::RuleStore;
use crate::validators::{panic_message, CancelFlag, ValidatorError, ValidatorKind, ValidatorSet};

/// Message sent by a validator task when it finishes.
struct Completion {
    slot: usize,
    outcome: Result<ValidationResult, ValidatorError>,
    elapsed_ms: u64,
}

/// Split `max_latency_ms` across validators in proportion to their weights.
///
/// Every validator gets at least one millisecond.
pub fn allocate_budgets(event: &QaEvent, kinds: &[ValidatorKind]) -> Vec<Duration> {
    let total: u128 = kinds.iter().map(|k| u128::from(event.weight_of(*k))).sum();
    kinds
        .iter()
        .map(|k| {
            let share = u128::from(event.max_latency_ms) * u128::from(event.weight_of(*k))
                / total.max(1);
            let share = u64::try_from(share).unwrap_or(u64::MAX);
            Duration::from_millis(share.max(1))
        })
        .collect()
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs the validators an event asks for and aggregates their results.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    validators: ValidatorSet,
    rules: Arc<RuleStore>,
    breakers: Arc<BreakerRegistry>,
    resolver: ActionResolver,
}

impl ExecutionCoordinator {
    pub fn new(
        validators: ValidatorSet,
        rules: Arc<RuleStore>,
        breakers: Arc<BreakerRegistry>,
        resolver: ActionResolver,
    ) -> Self {
        Self {
            validators,
            rules,
            breakers,
            resolver,
        }
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Validate `ctx` against `event`.
    ///
    /// Fails only when the event names an unknown validator; that check
    /// happens before anything runs. Validator errors, panics and timeouts
    /// become synthetic results.
    pub async fn run(
        &self,
        event: &QaEvent,
        ctx: Arc<ValidationContext>,
    ) -> Result<AggregatedResult, ConfigError> {
        let kinds = event.resolve_validators()?;
        let invocation_id = Uuid::new_v4();
        let span = obs::invocation_span(&event.event_id, &invocation_id);
        Ok(self
            .run_resolved(event, &kinds, ctx, invocation_id)
            .instrument(span)
            .await)
    }

    async fn run_resolved(
        &self,
        event: &QaEvent,
        kinds: &[ValidatorKind],
        ctx: Arc<ValidationContext>,
        invocation_id: Uuid,
    ) -> AggregatedResult {
        let started = Instant::now();
        let deadline = started
            .checked_add(Duration::from_millis(event.max_latency_ms))
            .unwrap_or_else(|| started + Duration::from_secs(86_400 * 365));
        let rules = self.rules.snapshot();
        METRICS.inc_invocations();
        obs::emit_invocation_started(&event.event_id, &invocation_id, kinds, event.max_latency_ms);

        let budgets = allocate_budgets(event, kinds);
        let mut slots: Vec<Option<ValidationResult>> = vec![None; kinds.len()];
        let (tx, mut rx) = mpsc::channel::<Completion>(kinds.len().max(1));
        let sem = Arc::new(Semaphore::new(kinds.len().max(1)));
        let cancel = CancelFlag::default();
        let mut tasks = Vec::with_capacity(kinds.len());

        for (slot, &kind) in kinds.iter().enumerate() {
            let breaker = self.breakers.get(kind);
            let (admission, transition) = breaker.admit();
            if let Some(t) = transition {
                obs::emit_breaker_transition(&t);
            }
            if let Admission::Rejected {
                consecutive_failures,
            } = admission
            {
                METRICS.inc_skips();
                obs::emit_validator_skipped(&event.event_id, kind, consecutive_failures);
                slots[slot] = Some(ValidationResult::skipped(kind, event.skip_blocks));
                continue;
            }

            let validator = self.validators.get(kind);
            let ctx = Arc::clone(&ctx);
            let rules = Arc::clone(&rules);
            let tx = tx.clone();
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();
            let budget = budgets[slot];

            tasks.push(tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let begun = Instant::now();
                    let guarded =
                        AssertUnwindSafe(validator.validate(ctx, rules, cancel)).catch_unwind();
                    let outcome = match timeout(budget, guarded).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(payload)) => Err(ValidatorError::Panicked {
                            message: panic_message(payload.as_ref()),
                        }),
                        Err(_) => Err(ValidatorError::Timeout {
                            limit_ms: duration_ms(budget),
                        }),
                    };
                    let _ = tx
                        .send(Completion {
                            slot,
                            outcome,
                            elapsed_ms: duration_ms(begun.elapsed()),
                        })
                        .await;
                }
                .in_current_span(),
            ));
        }
        drop(tx);

        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(done)) => {
                    let kind = kinds[done.slot];
                    slots[done.slot] =
                        Some(self.settle(event, kind, done.outcome, done.elapsed_ms));
                }
                // All senders finished, or the overall deadline passed.
                Ok(None) | Err(_) => break,
            }
        }
        cancel.cancel();
        for task in &tasks {
            task.abort();
        }

        let results: Vec<ValidationResult> = slots
            .into_iter()
            .enumerate()
            .map(|(slot, result)| match result {
                Some(result) => result,
                None => {
                    let kind = kinds[slot];
                    let limit_ms = duration_ms(budgets[slot]);
                    self.settle(event, kind, Err(ValidatorError::Timeout { limit_ms }), limit_ms)
                }
            })
            .collect();

        let resolution = self.resolver.resolve(event, &results);
        let aggregated = AggregatedResult {
            invocation_id,
            event_id: event.event_id.clone(),
            passed: results.iter().all(|r| r.passed),
            severity: max_severity(&results),
            results,
            action: resolution.action,
            reason: resolution.reason,
            suggestions: resolution.suggestions,
            rules_digest: rules.digest().to_string(),
            duration_ms: duration_ms(started.elapsed()),
            timestamp: Utc::now(),
        };

        match aggregated.action {
            Action::Block => METRICS.inc_blocks(),
            Action::AutoFix => METRICS.inc_auto_fixes(),
            Action::Warn => METRICS.inc_warnings(),
            Action::None => {}
        }
        obs::emit_invocation_finished(&aggregated);
        aggregated
    }

    /// Turn a validator outcome into its result and feed the breaker.
    fn settle(
        &self,
        event: &QaEvent,
        kind: ValidatorKind,
        outcome: Result<ValidationResult, ValidatorError>,
        elapsed_ms: u64,
    ) -> ValidationResult {
        let breaker = self.breakers.get(kind);
        let (result, transition) = match outcome {
            Ok(result) => (result.with_duration_ms(elapsed_ms), breaker.record_success()),
            Err(error) => {
                match &error {
                    ValidatorError::Timeout { limit_ms } => {
                        METRICS.inc_timeouts();
                        obs::emit_validator_timeout(&event.event_id, kind, *limit_ms);
                    }
                    ValidatorError::Panicked { .. } => {
                        METRICS.inc_panics();
                        obs::emit_validator_failed(&event.event_id, kind, &error);
                    }
                    _ => {
                        METRICS.inc_errors();
                        obs::emit_validator_failed(&event.event_id, kind, &error);
                    }
                }
                let result = error
                    .into_result(kind, event.timeout_blocks)
                    .with_duration_ms(elapsed_ms);
                (result, breaker.record_failure())
            }
        };
        if let Some(t) = transition {
            obs::emit_breaker_transition(&t);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_budget_split() {
        let event = QaEvent::new("e", &["structural", "security", "compliance", "semantic"], 100);
        let kinds = event.resolve_validators().unwrap();
        let budgets = allocate_budgets(&event, &kinds);
        assert_eq!(budgets, vec![Duration::from_millis(25); 4]);
    }

    #[test]
    fn test_weighted_budget_split() {
        let event = QaEvent::new("e", &["security", "semantic"], 100).with_weight("semantic", 3);
        let kinds = event.resolve_validators().unwrap();
        let budgets = allocate_budgets(&event, &kinds);
        assert_eq!(
            budgets,
            vec![Duration::from_millis(25), Duration::from_millis(75)]
        );
    }

    #[test]
    fn test_budget_floor_is_one_ms() {
        let event = QaEvent::new("e", &["structural", "security", "compliance"], 2);
        let kinds = event.resolve_validators().unwrap();
        assert!(allocate_budgets(&event, &kinds)
            .iter()
            .all(|b| *b >= Duration::from_millis(1)));
    }

    #[test]
    fn test_budget_split_does_not_overflow() {
        let event = QaEvent::new("e", &["security", "semantic"], u64::MAX)
            .with_weight("security", u32::MAX);
        let kinds = event.resolve_validators().unwrap();
        let budgets = allocate_budgets(&event, &kinds);
        assert_eq!(budgets.len(), 2);
        assert!(budgets[0] > budgets[1]);
    }
}
