use std::path::PathBuf;

/// Errors raised while loading a rule snapshot.
///
/// Only a snapshot that cannot be read at all is an error. Individual bad
/// entries are skipped and reported through [`super::RuleIndex::skipped`].
#[derive(Debug, thiserror::Error)]
pub enum RuleLoadError {
    #[error("failed to read rule snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}
