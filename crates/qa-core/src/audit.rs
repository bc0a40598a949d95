//! Audit sinks that receive finished results.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::AggregatedResult;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// Receives every finished [`AggregatedResult`].
///
/// A failing sink is logged by the router and never changes the result.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, result: &AggregatedResult) -> Result<(), AuditError>;
}

/// In-memory sink, mainly for tests and the `serve` session summary.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AggregatedResult>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AggregatedResult> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, result: &AggregatedResult) -> Result<(), AuditError> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(result.clone());
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Keep event ids usable as a single path component.
fn sanitize_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Filesystem sink writing `<dir>/<event_id>/<invocation_id>.json` plus a
/// `.digest` file holding the SHA-256 of the JSON bytes.
#[derive(Debug, Clone)]
pub struct FsAuditSink {
    dir: PathBuf,
}

impl FsAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, event_id: &str, invocation_id: &Uuid) -> (PathBuf, PathBuf) {
        let event_dir = self.dir.join(sanitize_component(event_id));
        (
            event_dir.join(format!("{invocation_id}.json")),
            event_dir.join(format!("{invocation_id}.digest")),
        )
    }

    /// Persist a result and return the path of its JSON record.
    pub fn write(&self, result: &AggregatedResult) -> Result<PathBuf, AuditError> {
        let (path, digest_path) = self.paths(&result.event_id, &result.invocation_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(result)?;
        std::fs::write(&path, &json)?;
        std::fs::write(&digest_path, sha256_hex(&json).as_bytes())?;
        Ok(path)
    }

    /// Read a stored result back, verifying its digest.
    pub fn read(&self, event_id: &str, invocation_id: &Uuid) -> Result<AggregatedResult, AuditError> {
        let (path, digest_path) = self.paths(event_id, invocation_id);
        let json = std::fs::read(&path)?;
        let expected = std::fs::read_to_string(&digest_path)?;
        let actual = sha256_hex(&json);
        if expected.trim() != actual {
            return Err(AuditError::DigestMismatch {
                expected: expected.trim().to_string(),
                actual,
            });
        }
        Ok(serde_json::from_slice(&json)?)
    }
}

#[async_trait]
impl AuditSink for FsAuditSink {
    fn name(&self) -> &str {
        "fs"
    }

    async fn record(&self, result: &AggregatedResult) -> Result<(), AuditError> {
        let sink = self.clone();
        let result = result.clone();
        tokio::task::spawn_blocking(move || sink.write(&result))
            .await
            .map_err(|e| AuditError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map(|_| ())
    }
}
