use serde_json::Value;
use taskpool::error::{exit_codes, Error, JsonError, ServiceError};
use taskpool::model::Status;

#[test]
fn exit_code_user_error() {
    let err = Error::InvalidTransition {
        action: "verify".to_string(),
        from: Status::Unassigned,
    };
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    assert!(err.is_validation());
}

#[test]
fn exit_code_conflict() {
    let err = Error::StateConflict {
        assignment_id: "asg-1".to_string(),
        expected: Status::NeedVerify,
        actual: Status::InProgress,
    };
    assert_eq!(err.exit_code(), exit_codes::CONFLICT);
    assert!(err.is_retryable());
    assert!(!err.is_validation());
}

#[test]
fn exit_code_operation_failed() {
    let err = Error::SettlementFailure {
        assignment_id: "asg-1".to_string(),
        reason: "timed out".to_string(),
    };
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
    assert!(err.is_retryable());
}

#[test]
fn service_errors_keep_their_meaning() {
    let conflict: Error = ServiceError::StateConflict {
        assignment_id: "asg-1".to_string(),
        expected: Status::Assigned,
        actual: Status::Giveup,
    }
    .into();
    assert!(matches!(conflict, Error::StateConflict { .. }));

    let rejected: Error = ServiceError::Rejected("reward too large".to_string()).into();
    assert!(matches!(rejected, Error::InvalidArgument(_)));

    let transport: Error = ServiceError::Transport("reset".to_string()).into();
    assert!(transport.is_retryable());
}

#[test]
fn json_error_includes_kind_and_code() {
    let err = Error::TemplateInUse {
        template_id: "tpl-1".to_string(),
        active: 2,
    };
    let value: Value = serde_json::to_value(JsonError::from(&err)).expect("json");
    assert_eq!(value["code"], exit_codes::USER_ERROR);
    assert_eq!(value["retryable"], false);
    assert!(value["error"]
        .as_str()
        .expect("message")
        .contains("tpl-1"));
}
