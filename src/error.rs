//! Engine error taxonomy.
//!
//! Every failure the engine can report to a host is one of these variants.
//! Nothing in the core panics across the orchestrator boundary; subsystem
//! failures are captured per call and surfaced in the result envelope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A message with empty or missing content was rejected at the boundary.
    /// No state is mutated.
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// A patch operation referenced a path absent from the state being
    /// mutated. The offending operation is skipped and logged; the rest of
    /// the patch still applies.
    #[error("patch operation {op} references missing path: {path}")]
    PatchApply { op: String, path: String },

    /// A requested version lies outside the reachable range. `earliest`
    /// starts at 1 and rises to the base version after a chain collapse.
    #[error("version {requested} out of range [{earliest}, {current}]")]
    VersionOutOfRange {
        requested: u64,
        earliest: u64,
        current: u64,
    },

    /// A dependent collaborator (e.g. image enrichment) is not installed.
    /// Callers receive this as an explicit unavailable result so the rest of
    /// the pipeline can degrade gracefully.
    #[error("module unavailable: {module}")]
    ModuleUnavailable { module: String },

    /// The reconstructed state deviates from what the patch chain recorded.
    /// Logged as a warning by the version store; not fatal.
    #[error("reconstruction mismatch at version {version}: expected {expected} nodes, got {actual}")]
    ReconstructionMismatch {
        version: u64,
        expected: usize,
        actual: usize,
    },

    /// A node id was referenced that no subsystem knows about.
    #[error("unknown node: {id}")]
    UnknownNode { id: String },

    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
