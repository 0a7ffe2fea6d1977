//! Error types for taskpool
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, transition not allowed from the current state)
//! - 3: Conflict (the assignment changed elsewhere)
//! - 4: Operation failed (transport, settlement, storage)

use std::path::PathBuf;
use thiserror::Error;

use crate::model::Status;

/// Exit codes for the taskpool CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskpool operations
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (exit code 2), resolved locally without a network call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot {action} an assignment that is {from}")]
    InvalidTransition { action: String, from: Status },

    #[error("{role} may not {action} an assignment")]
    RoleNotPermitted { action: String, role: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template {template_id} still has {active} active assignment(s)")]
    TemplateInUse { template_id: String, active: usize },

    // Conflicts (exit code 3)
    #[error("Assignment {assignment_id} changed elsewhere: expected {expected}, found {actual}")]
    StateConflict {
        assignment_id: String,
        expected: Status,
        actual: Status,
    },

    // Operation failures (exit code 4)
    #[error("Settlement not confirmed for {assignment_id}: {reason}")]
    SettlementFailure {
        assignment_id: String,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0}ms waiting for confirmation")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::InvalidTransition { .. }
            | Error::RoleNotPermitted { .. }
            | Error::NotFound(_)
            | Error::TemplateInUse { .. } => exit_codes::USER_ERROR,

            Error::StateConflict { .. } => exit_codes::CONFLICT,

            Error::SettlementFailure { .. }
            | Error::Transport(_)
            | Error::Timeout(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::LockFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Rejected locally; the request never reached the record service.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::InvalidTransition { .. } | Error::RoleNotPermitted { .. }
        )
    }

    /// Whether the user may re-issue the action after the pool refetches.
    ///
    /// The engine itself never retries: a repeated `verify` must come from
    /// the caller, starting from the freshly fetched status.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StateConflict { .. }
                | Error::SettlementFailure { .. }
                | Error::Transport(_)
                | Error::Timeout(_)
        )
    }

    /// Stable machine-readable kind used in JSON envelopes and notices.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StateConflict { .. } => "state_conflict",
            Error::SettlementFailure { .. } => "settlement_failure",
            Error::Transport(_) | Error::Timeout(_) => "transport_error",
            err if err.is_validation() => "validation_error",
            err if err.exit_code() == exit_codes::USER_ERROR => "user_error",
            _ => "operation_failed",
        }
    }
}

/// Errors reported across the record service boundary.
///
/// Cloneable so one coalesced read can hand the same outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("assignment {assignment_id} is {actual}, not {expected}")]
    StateConflict {
        assignment_id: String,
        expected: Status,
        actual: Status,
    },

    #[error("cannot {action} an assignment that is {from}")]
    InvalidTransition { action: String, from: Status },

    #[error("{role} may not {action} an assignment")]
    RoleNotPermitted { action: String, role: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("template {template_id} still has {active} active assignment(s)")]
    TemplateInUse { template_id: String, active: usize },

    #[error("{0}")]
    Transport(String),
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::StateConflict {
                assignment_id,
                expected,
                actual,
            } => Error::StateConflict {
                assignment_id,
                expected,
                actual,
            },
            ServiceError::InvalidTransition { action, from } => {
                Error::InvalidTransition { action, from }
            }
            ServiceError::RoleNotPermitted { action, role } => {
                Error::RoleNotPermitted { action, role }
            }
            ServiceError::NotFound(what) => Error::NotFound(what),
            ServiceError::Rejected(reason) => Error::InvalidArgument(reason),
            ServiceError::TemplateInUse {
                template_id,
                active,
            } => Error::TemplateInUse {
                template_id,
                active,
            },
            ServiceError::Transport(reason) => Error::Transport(reason),
        }
    }
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        match err {
            Error::StateConflict {
                assignment_id,
                expected,
                actual,
            } => ServiceError::StateConflict {
                assignment_id,
                expected,
                actual,
            },
            Error::InvalidTransition { action, from } => {
                ServiceError::InvalidTransition { action, from }
            }
            Error::RoleNotPermitted { action, role } => {
                ServiceError::RoleNotPermitted { action, role }
            }
            Error::NotFound(what) => ServiceError::NotFound(what),
            Error::InvalidArgument(reason) => ServiceError::Rejected(reason),
            Error::TemplateInUse {
                template_id,
                active,
            } => ServiceError::TemplateInUse {
                template_id,
                active,
            },
            other => ServiceError::Transport(other.to_string()),
        }
    }
}

/// Result type alias for taskpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
    pub retryable: bool,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
            retryable: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_conflict_round_trips_into_state_conflict() {
        let err: Error = ServiceError::StateConflict {
            assignment_id: "asg-1".to_string(),
            expected: Status::NeedVerify,
            actual: Status::Completed,
        }
        .into();
        assert!(matches!(err, Error::StateConflict { .. }));
        assert_eq!(err.exit_code(), exit_codes::CONFLICT);
        assert!(err.is_retryable());
    }

    #[test]
    fn storage_errors_cross_the_boundary_as_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: ServiceError = Error::Io(io).into();
        assert!(matches!(err, ServiceError::Transport(msg) if msg.contains("disk gone")));
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = Error::InvalidTransition {
            action: "verify".to_string(),
            from: Status::Assigned,
        };
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "validation_error");
    }
}
