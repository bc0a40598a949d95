//! Per-validator circuit breakers.
//!
//! A breaker opens after `failure_threshold` consecutive failures (errors,
//! panics or timeouts), rejects calls until `cooldown_ms` has elapsed, then
//! admits calls in half-open state. The next success closes it; the next
//! failure re-opens it.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::validators::ValidatorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// Whether a validator may be invoked right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Cooldown elapsed; this call decides whether the breaker closes.
    Probe,
    Rejected { consecutive_failures: u32 },
}

impl Admission {
    pub fn is_rejected(self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// A state change, reported so the caller can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub validator: ValidatorKind,
    pub from: BreakerState,
    pub to: BreakerState,
    pub consecutive_failures: u32,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub validator: ValidatorKind,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_transition: Instant,
    last_transition_at: DateTime<Utc>,
}

impl Inner {
    fn transition(&mut self, validator: ValidatorKind, to: BreakerState) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition = Instant::now();
        self.last_transition_at = Utc::now();
        Transition {
            validator,
            from,
            to,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Circuit breaker for one validator kind.
#[derive(Debug)]
pub struct CircuitBreaker {
    validator: ValidatorKind,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(validator: ValidatorKind, config: BreakerConfig) -> Self {
        Self {
            validator,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                last_transition_at: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent across a panic: every update is a plain store.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide whether to invoke the validator, moving `Open -> HalfOpen` once
    /// the cooldown has elapsed.
    pub fn admit(&self) -> (Admission, Option<Transition>) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => (Admission::Allowed, None),
            BreakerState::HalfOpen => (Admission::Probe, None),
            BreakerState::Open => {
                let cooldown = Duration::from_millis(self.config.cooldown_ms);
                if inner.last_transition.elapsed() >= cooldown {
                    let t = inner.transition(self.validator, BreakerState::HalfOpen);
                    (Admission::Probe, Some(t))
                } else {
                    (
                        Admission::Rejected {
                            consecutive_failures: inner.consecutive_failures,
                        },
                        None,
                    )
                }
            }
        }
    }

    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            BreakerState::Closed => None,
            _ => Some(inner.transition(self.validator, BreakerState::Closed)),
        }
    }

    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            BreakerState::HalfOpen => Some(inner.transition(self.validator, BreakerState::Open)),
            BreakerState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                Some(inner.transition(self.validator, BreakerState::Open))
            }
            _ => None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            validator: self.validator,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_transition_at: inner.last_transition_at,
        }
    }
}

/// One breaker per validator kind.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: [CircuitBreaker; 4],
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: ValidatorKind::ALL.map(|kind| CircuitBreaker::new(kind, config)),
        }
    }

    pub fn get(&self, kind: ValidatorKind) -> &CircuitBreaker {
        &self.breakers[kind.index()]
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(CircuitBreaker::snapshot).collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            ValidatorKind::Semantic,
            BreakerConfig {
                failure_threshold: threshold,
                cooldown_ms,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let b = breaker(3, 1_000);
        assert!(b.record_failure().is_none());
        assert!(b.record_failure().is_none());
        let t = b.record_failure().unwrap();
        assert_eq!(t.from, BreakerState::Closed);
        assert_eq!(t.to, BreakerState::Open);
        assert_eq!(t.consecutive_failures, 3);
        assert!(b.admit().0.is_rejected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let b = breaker(3, 1_000);
        b.record_failure();
        b.record_failure();
        assert!(b.record_success().is_none());
        assert_eq!(b.failure_count(), 0);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown_then_close() {
        let b = breaker(1, 1_000);
        b.record_failure();
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(b.admit().0.is_rejected());

        tokio::time::advance(Duration::from_millis(1)).await;
        let (admission, t) = b.admit();
        assert_eq!(admission, Admission::Probe);
        assert_eq!(t.unwrap().to, BreakerState::HalfOpen);

        let t = b.record_success().unwrap();
        assert_eq!(t.from, BreakerState::HalfOpen);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(2, 500);
        b.record_failure();
        b.record_failure();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(b.admit().0, Admission::Probe);

        let t = b.record_failure().unwrap();
        assert_eq!(t.to, BreakerState::Open);
        assert!(b.admit().0.is_rejected());
    }

    #[test]
    fn test_registry_has_one_breaker_per_kind() {
        let registry = BreakerRegistry::default();
        registry.get(ValidatorKind::Security).record_failure();
        assert_eq!(registry.get(ValidatorKind::Security).failure_count(), 1);
        assert_eq!(registry.get(ValidatorKind::Compliance).failure_count(), 0);
        assert_eq!(registry.snapshots().len(), 4);
    }
}
