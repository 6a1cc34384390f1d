//! Error taxonomy shared by selection, planning and mutation

use serde_json::{Value, json};
use thiserror::Error;

/// Errors produced while handling a command
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A request field is missing, malformed or out of range
    #[error("{0}")]
    InvalidInput(String),

    /// A selector string could not be parsed
    #[error("{0}")]
    InvalidSelector(String),

    /// A body, entity, feature or sketch could not be found
    #[error("{message}")]
    NotFound {
        message: String,
        /// Sorted body names offered when body resolution fails
        candidates: Option<Vec<String>>,
    },

    /// The host raised while creating the feature
    #[error("{0}")]
    ApplyFailed(String),

    /// A guardrail threshold was exceeded and the feature was rolled back
    #[error("{0}")]
    Guardrail(String),

    /// New-body disambiguation found zero or several new bodies
    #[error("{0}")]
    ResultAmbiguous(String),

    /// Rolling back a failed mutation did not succeed
    #[error("{cause} (rollback failed: {reason})")]
    RollbackFailed { cause: String, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A handler panicked
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a not-found error without candidates
    pub fn not_found(message: impl Into<String>) -> Self {
        EngineError::NotFound {
            message: message.into(),
            candidates: None,
        }
    }

    /// Create a not-found error listing candidate body names
    pub fn not_found_with(message: impl Into<String>, candidates: Vec<String>) -> Self {
        EngineError::NotFound {
            message: message.into(),
            candidates: Some(candidates),
        }
    }

    /// Snake-case taxonomy name emitted as `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::InvalidSelector(_) => "invalid_selector",
            EngineError::NotFound { .. } => "not_found",
            EngineError::ApplyFailed(_) => "apply_failed",
            EngineError::Guardrail(_) => "guardrail_violation",
            EngineError::ResultAmbiguous(_) => "result_ambiguous",
            EngineError::RollbackFailed { .. } => "rollback_failed",
            EngineError::UnknownCommand(_) => "unknown_command",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Candidate body names carried by a not-found error
    pub fn candidates(&self) -> Option<&[String]> {
        match self {
            EngineError::NotFound {
                candidates: Some(c),
                ..
            } => Some(c),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A failed command together with the partial response data
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    pub error: EngineError,
    /// Sent as `data`, e.g. the plan of a rolled back mutation
    pub data: Option<Value>,
}

impl CommandFailure {
    /// Failure that carries the plan it was working on
    pub fn with_plan(error: EngineError, plan: &Value) -> Self {
        Self {
            error,
            data: Some(json!({ "preview": { "plan": plan } })),
        }
    }
}

impl From<EngineError> for CommandFailure {
    fn from(error: EngineError) -> Self {
        Self { error, data: None }
    }
}

/// Result type for command handlers
pub type CommandResult<T> = Result<T, CommandFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_failed_keeps_cause() {
        let err = EngineError::RollbackFailed {
            cause: "face_count_delta exceeded MAX_FACE_DELTA (150)".into(),
            reason: "delete refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("face_count_delta"));
        assert!(msg.contains("delete refused"));
        assert_eq!(err.kind(), "rollback_failed");
    }

    #[test]
    fn test_candidates_only_on_not_found() {
        let err = EngineError::not_found_with("Body not found: X", vec!["A".into()]);
        assert_eq!(err.candidates(), Some(&["A".to_string()][..]));
        assert!(EngineError::InvalidInput("x".into()).candidates().is_none());
    }

    #[test]
    fn test_failure_with_plan() {
        let plan = json!({ "radius_mm": 2.0 });
        let failure = CommandFailure::with_plan(EngineError::Guardrail("limit".into()), &plan);
        assert_eq!(failure.data.unwrap()["preview"]["plan"]["radius_mm"], 2.0);
        let plain: CommandFailure = EngineError::InvalidInput("bad".into()).into();
        assert!(plain.data.is_none());
    }
}
