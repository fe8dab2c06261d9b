//! Error types for the Archi control plane.
//!
//! [`ArchiError`] is the top-level error type shared across crates. It is
//! non-exhaustive so new variants can be added without breaking downstream.
//!
//! Budget exhaustion is deliberately NOT an error variant: the router
//! reports it as a structured blocked result, because a gate is an expected
//! outcome, not a failure.

use thiserror::Error;

/// Top-level error type for the Archi control plane.
///
/// Variants are grouped into recoverable (provider, timeout) and fatal
/// (config, I/O, serialization) categories to guide callers on whether a
/// fallback is worthwhile.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ArchiError {
    // ── Recoverable ──────────────────────────────────────────────────

    /// A completion provider returned an error (bad request, server error).
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// Goal decomposition produced output the store could not use.
    #[error("decomposition failed: {reason}")]
    Decomposition {
        /// Why the planner output was rejected.
        reason: String,
    },

    // ── Fatal ────────────────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The referenced goal does not exist in the store.
    #[error("goal not found: {0}")]
    GoalNotFound(String),

    /// The referenced task does not exist in any goal.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A task prerequisite graph contains a cycle.
    #[error("prerequisite cycle in goal {goal_id}")]
    CycleDetected {
        /// The goal whose task graph is cyclic.
        goal_id: String,
    },

    /// A safety boundary was violated (path traversal, protected file).
    #[error("security violation: {reason}")]
    SecurityViolation {
        /// What policy was violated.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ArchiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ArchiError::Timeout {
            operation: "remote_completion".into(),
        };
        assert_eq!(err.to_string(), "operation timed out: remote_completion");

        let err = ArchiError::GoalNotFound("goal_7".into());
        assert_eq!(err.to_string(), "goal not found: goal_7");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ArchiError = io_err.into();
        assert!(matches!(err, ArchiError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad}}").unwrap_err();
        let err: ArchiError = json_err.into();
        assert!(matches!(err, ArchiError::Json(_)));
    }

    #[test]
    fn security_violation_display() {
        let err = ArchiError::SecurityViolation {
            reason: "path escapes workspace".into(),
        };
        assert_eq!(err.to_string(), "security violation: path escapes workspace");
    }

    #[test]
    fn result_alias_works() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        fn err_fn() -> Result<i32> {
            Err(ArchiError::Provider {
                message: "boom".into(),
            })
        }
        assert_eq!(ok_fn().unwrap(), 42);
        assert!(err_fn().is_err());
    }
}
