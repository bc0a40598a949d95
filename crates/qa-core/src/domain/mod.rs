//! Domain models for the QA engine.
//!
//! - `QaEvent`: a lifecycle event and the validators it requires
//! - `ValidationContext`: the input of one invocation
//! - `ValidationResult` / `AggregatedResult`: what validators and the engine produce

pub mod context;
pub mod error;
pub mod event;
pub mod outcome;
pub mod scan;

pub use context::{ValidationContext, ValidationRequest, DIMENSION_KEY, FRAMEWORKS_KEY};
pub use error::{ConfigError, QaError, QaResult};
pub use event::{EventRegistry, Priority, QaEvent};
pub use outcome::{
    max_severity, Action, AggregatedResult, AutoFixCandidate, ResultStatus, Severity,
    ValidationResponse, ValidationResult,
};
pub use scan::ScanSegment;
