//! Global atomic counters for QA engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the CLI exits).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    invocations: AtomicU64,
    blocks: AtomicU64,
    auto_fixes: AtomicU64,
    warnings: AtomicU64,
    timeouts: AtomicU64,
    panics: AtomicU64,
    errors: AtomicU64,
    skips: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub blocks: u64,
    pub auto_fixes: u64,
    pub warnings: u64,
    pub timeouts: u64,
    pub panics: u64,
    pub errors: u64,
    pub skips: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            auto_fixes: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            skips: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_invocations(&self) {
        Self::bump(&self.invocations, "invocations");
    }

    pub fn inc_blocks(&self) {
        Self::bump(&self.blocks, "blocks");
    }

    pub fn inc_auto_fixes(&self) {
        Self::bump(&self.auto_fixes, "auto_fixes");
    }

    pub fn inc_warnings(&self) {
        Self::bump(&self.warnings, "warnings");
    }

    /// Validator deadlines missed.
    pub fn inc_timeouts(&self) {
        Self::bump(&self.timeouts, "timeouts");
    }

    pub fn inc_panics(&self) {
        Self::bump(&self.panics, "panics");
    }

    pub fn inc_errors(&self) {
        Self::bump(&self.errors, "errors");
    }

    /// Validators bypassed by an open breaker.
    pub fn inc_skips(&self) {
        Self::bump(&self.skips, "skips");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            auto_fixes: self.auto_fixes.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (CLI exit, end of a serve session)
    /// rather than on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            invocations = s.invocations,
            blocks = s.blocks,
            auto_fixes = s.auto_fixes,
            warnings = s.warnings,
            timeouts = s.timeouts,
            panics = s.panics,
            errors = s.errors,
            skips = s.skips,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.invocations,
            &self.blocks,
            &self.auto_fixes,
            &self.warnings,
            &self.timeouts,
            &self.panics,
            &self.errors,
            &self.skips,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let m = Metrics::new();
        m.inc_invocations();
        m.inc_invocations();
        m.inc_blocks();
        m.inc_skips();
        m.inc_skips();
        m.inc_skips();
        let s = m.snapshot();
        assert_eq!(s.invocations, 2);
        assert_eq!(s.blocks, 1);
        assert_eq!(s.skips, 3);
        assert_eq!(s.panics, 0);
    }

    #[test]
    fn test_reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_invocations();
        m.inc_timeouts();
        m.inc_errors();
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
