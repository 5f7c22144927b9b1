//! Typed error hierarchy for the brandflow workflow core.
//!
//! Two top-level enums cover the two subsystems:
//! - `WorkflowError`: phase model, session state and transition failures
//! - `RecoveryError`: backoff interruptions inside recovery strategies

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from the phase model, session state and workflow manager.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown phase '{0}'. Valid values: discovery, research, visual, logo, brand, assets, delivery")]
    InvalidPhase(String),

    #[error("State key '{key}' holds {found}, expected a list")]
    NotAList { key: String, found: &'static str },

    #[error("State key '{key}' holds {found}, expected an object")]
    NotAnObject { key: String, found: &'static str },

    #[error("State key '{0}' is owned by the workflow manager and cannot be written directly")]
    ManagedKey(String),

    #[error("Failed to read session state at {path}: {source}")]
    StateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write session state at {path}: {source}")]
    StateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse session state at {path}: {source}")]
    StateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while a recovery strategy waits out its backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("Backoff of {delay:?} would run past the caller deadline")]
    DeadlineExceeded { delay: Duration },

    #[error("Backoff cancelled by caller")]
    Cancelled,

    #[error("Backoff timer unavailable: {0}")]
    TimerUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_invalid_phase_names_the_value() {
        let err = WorkflowError::InvalidPhase("launch".to_string());
        assert!(err.to_string().contains("'launch'"));
        assert!(err.to_string().contains("discovery"));
    }

    #[test]
    fn workflow_error_state_read_carries_path() {
        let path = PathBuf::from("/tmp/session.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = WorkflowError::StateRead {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            WorkflowError::StateRead { path: p, source: s } => {
                assert_eq!(p, &path);
                assert_eq!(s.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected StateRead"),
        }
    }

    #[test]
    fn workflow_error_not_a_list_is_matchable() {
        let err = WorkflowError::NotAList {
            key: "error_log".into(),
            found: "a string",
        };
        assert!(matches!(err, WorkflowError::NotAList { .. }));
        assert!(err.to_string().contains("error_log"));
    }

    #[test]
    fn workflow_error_managed_key_names_the_key() {
        let err = WorkflowError::ManagedKey("current_phase".into());
        assert!(err.to_string().contains("'current_phase'"));
        assert!(err.to_string().contains("workflow manager"));
    }

    #[test]
    fn workflow_error_converts_from_anyhow() {
        let err: WorkflowError = anyhow::anyhow!("scorer exploded").into();
        assert!(matches!(err, WorkflowError::Other(_)));
        assert_eq!(err.to_string(), "scorer exploded");
    }

    #[test]
    fn recovery_error_deadline_carries_delay() {
        let err = RecoveryError::DeadlineExceeded {
            delay: Duration::from_secs(4),
        };
        assert!(err.to_string().contains("4s"));
        assert_ne!(err, RecoveryError::Cancelled);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WorkflowError::InvalidPhase("x".into()));
        assert_std_error(&RecoveryError::Cancelled);
    }
}
