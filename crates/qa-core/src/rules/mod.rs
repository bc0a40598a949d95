//! Rule store: immutable snapshots, compiled indexes and similarity search.

pub mod error;
pub mod index;
pub mod similarity;
pub mod snapshot;
pub mod store;

pub use error::RuleLoadError;
pub use index::{Rule, RuleIndex, RuleMatch, SkippedRule};
pub use similarity::{cosine_similarity, DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};
pub use snapshot::{AutoFixSpec, ModelSpec, PatternSpec, RuleCategory, RuleSnapshot, RuleSpec};
pub use store::RuleStore;
