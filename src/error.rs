//! Error types.
//!
//! Section and retrieval errors are always recovered by the orchestrator.
//! Persistence errors are fatal to the run that hit them, never to the process.

use crate::models::RunStatus;
use thiserror::Error;

/// A single section's analyzer call failed.
#[derive(Debug, Error)]
pub enum SectionError {
    /// The executor does not know this section.
    #[error("Unknown section: {0}")]
    UnknownSection(String),

    /// The remote analysis service could not be reached or answered badly.
    #[error("Analysis service error: {0}")]
    Service(String),

    /// The analyzer produced output it could not use.
    #[error("Invalid analyzer output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the persistence contract.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Context retrieval could not answer a query. Always advisory.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Run {0} has no frameworks to execute")]
    NoFrameworks(String),

    /// Failure outside section isolation; the run is marked failed.
    #[error("Run fatal error: {0}")]
    RunFatal(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OrchestratorError::InvalidTransition {
            run_id: "r1".into(),
            from: RunStatus::Completed,
            to: RunStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition for run r1: completed -> in_progress"
        );

        let err: OrchestratorError = PersistenceError::NotFound("r2".into()).into();
        assert_eq!(err.to_string(), "Run not found: r2");
    }
}
