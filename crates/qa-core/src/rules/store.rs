//! Atomically swappable holder of the active rule index.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::error::RuleLoadError;
use super::index::RuleIndex;
use crate::obs;

/// Shared handle to the active [`RuleIndex`].
///
/// Readers take a snapshot with [`RuleStore::snapshot`] and keep using it for
/// a whole invocation; a concurrent [`RuleStore::swap`] never changes what an
/// in-flight invocation sees.
#[derive(Debug)]
pub struct RuleStore {
    current: ArcSwap<RuleIndex>,
}

impl RuleStore {
    pub fn new(index: RuleIndex) -> Self {
        obs::emit_rules_loaded(index.digest(), index.len(), index.skipped().len());
        let degraded = index.degraded_categories();
        if !degraded.is_empty() {
            obs::emit_rules_degraded(&degraded);
        }
        Self {
            current: ArcSwap::from_pointee(index),
        }
    }

    /// The index in effect right now.
    pub fn snapshot(&self) -> Arc<RuleIndex> {
        self.current.load_full()
    }

    /// Replace the active index, returning the previous one.
    pub fn swap(&self, index: RuleIndex) -> Arc<RuleIndex> {
        let degraded = index.degraded_categories();
        let new_digest = index.digest().to_string();
        let previous = self.current.swap(Arc::new(index));
        obs::emit_rules_swapped(previous.digest(), &new_digest);
        if !degraded.is_empty() {
            obs::emit_rules_degraded(&degraded);
        }
        previous
    }

    /// Load a snapshot from disk and swap it in.
    ///
    /// On error the previous index stays active.
    pub fn reload_from_path(&self, path: &Path) -> Result<Arc<RuleIndex>, RuleLoadError> {
        match RuleIndex::load_path(path) {
            Ok(index) => {
                self.swap(index);
                Ok(self.snapshot())
            }
            Err(e) => {
                obs::emit_rules_reload_failed(&path.display(), &e);
                Err(e)
            }
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(RuleIndex::empty())
    }
}
