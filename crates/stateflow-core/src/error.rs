use thiserror::Error;

use crate::types::{error_names, ErrorOutput};

#[derive(Debug, Error)]
pub enum EngineError {
    // Definition errors — fatal, never retried or caught
    #[error("Invalid state machine: {0}")]
    Syntax(String),

    #[error("State '{0}' does not exist in the state machine")]
    StateNotFound(String),

    // Expression failures — catchable as States.QueryEvaluationError
    #[error("Expression evaluation failed: {0}")]
    Expression(String),

    // An unhandled ErrorOutput escaping a state machine invocation
    #[error("Execution failed with {error}: {}", cause.as_deref().unwrap_or("(no cause)"))]
    Execution {
        error: String,
        cause: Option<String>,
        state_stack: Vec<String>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Definition-level errors abort the run without consulting Retry/Catch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Syntax(_) | Self::StateNotFound(_) | Self::Json(_)
        )
    }

    /// The `ErrorOutput` this error contributes to Retry/Catch matching,
    /// or `None` for fatal errors.
    pub fn error_output(&self) -> Option<ErrorOutput> {
        match self {
            Self::Expression(msg) => Some(ErrorOutput::new(
                error_names::QUERY_EVALUATION_ERROR,
                Some(msg.clone()),
            )),
            Self::Execution { error, cause, .. } => {
                Some(ErrorOutput::new(error.clone(), cause.clone()))
            }
            _ => None,
        }
    }

    pub fn from_error_output(output: ErrorOutput, state_stack: Vec<String>) -> Self {
        Self::Execution {
            error: output.error,
            cause: output.cause,
            state_stack,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_split() {
        assert!(EngineError::Syntax("bad".into()).is_fatal());
        assert!(EngineError::StateNotFound("X".into()).is_fatal());
        assert!(!EngineError::Expression("no match".into()).is_fatal());
    }

    #[test]
    fn test_expression_becomes_query_evaluation_error() {
        let eo = EngineError::Expression("path '$.x' did not match".into())
            .error_output()
            .unwrap();
        assert_eq!(eo.error, error_names::QUERY_EVALUATION_ERROR);
        assert!(eo.cause.unwrap().contains("$.x"));
    }

    #[test]
    fn test_syntax_has_no_error_output() {
        assert!(EngineError::Syntax("bad".into()).error_output().is_none());
    }

    #[test]
    fn test_execution_roundtrip() {
        let eo = ErrorOutput::new("States.TaskFailed", Some("boom".into()));
        let err = EngineError::from_error_output(eo.clone(), vec!["A".into()]);
        assert_eq!(err.error_output().unwrap(), eo);
    }
}
