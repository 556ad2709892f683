//! Typed error hierarchy for the Waypoint engine.
//!
//! Four enums cover the subsystems:
//! - `EngineError`: run-level failures (only discovery failures halt a run)
//! - `ExecutionError`: per-task failures, always recorded and never propagated
//! - `ServiceError`: answer service failures surfaced through `ExecutionError`
//! - `StoreError`: snapshot persistence failures

use thiserror::Error;

/// Errors from the workflow orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A run is already active (phase: {phase})")]
    RunAlreadyActive { phase: String },

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single task's executor protocol.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("could not extract assignment instructions")]
    InstructionsUnavailable,

    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u32 },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Whether the failure came from missing answer service configuration.
    pub fn is_credential_missing(&self) -> bool {
        matches!(self, Self::Service(ServiceError::CredentialMissing(_)))
    }
}

/// Errors from the answer-inference collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("API key not configured: {0}")]
    CredentialMissing(String),

    #[error("Answer service transport error: {0}")]
    Transport(String),

    #[error("Answer service returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from the durable snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot I/O failed at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot at {path} is corrupt: {source}")]
    Corrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Snapshot lock poisoned")]
    LockPoisoned,
}
