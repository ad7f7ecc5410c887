//! Error types for the execution orchestrator.
//!
//! Case-level errors (validation, a single submission failing) are
//! handled at the point of submission and never cascade into
//! session-level failure. A watch timing out is not an error at all; it
//! surfaces as a watch event.

use thiserror::Error;

/// Errors surfaced by the orchestrator to its embedding layer.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Submitted result missing required fields; no state was mutated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A session is never created for an empty case set.
    #[error("Cannot start an execution session with no target cases")]
    EmptyTargetSet,

    /// A persistence call for this case is still in flight.
    #[error("Submission already in flight for case {case_id}")]
    SubmissionInFlight { case_id: String },

    /// Backend persistence failure, with the phase it happened in.
    #[error("Persistence error during {phase}: {message}")]
    Persistence { phase: &'static str, message: String },

    /// Backend record does not exist. During teardown this is a success
    /// outcome, not an error to surface.
    #[error("Execution record not found: {0}")]
    NotFound(String),

    /// Case-detail service failure.
    #[error("Case service error for case {case_id}: {message}")]
    CaseService { case_id: String, message: String },

    /// Push channel failure. Never fails the orchestration by itself; the
    /// reconciliation poll remains the completion mechanism.
    #[error("Push channel error: {0}")]
    Channel(String),

    /// Operation against a session already finalized or deleted.
    #[error("Session {0} is already closed")]
    SessionClosed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using OrchestratorError.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = OrchestratorError::Validation("actual result is required".to_string());
        assert_eq!(err.to_string(), "Validation error: actual result is required");
    }

    #[test]
    fn test_persistence_error_carries_phase() {
        let err = OrchestratorError::Persistence {
            phase: "create",
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("create"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_in_flight_error_names_case() {
        let err = OrchestratorError::SubmissionInFlight {
            case_id: "case-7".to_string(),
        };
        assert!(err.to_string().contains("case-7"));
    }
}
