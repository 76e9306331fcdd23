use serde_json::Value;
use boardsync::error::{exit_codes, Error, JsonError, RemoteError, ValidationError};

#[test]
fn exit_code_user_error() {
    let err = Error::InvalidArgument("bad input".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    assert!(err.is_user_error());
}

#[test]
fn validation_and_not_found_are_user_errors() {
    let err: Error = ValidationError::new("title", "cannot be empty").into();
    assert!(err.is_user_error());
    assert!(Error::not_found("task", "t1").is_user_error());
}

#[test]
fn remote_failures_are_operation_failures() {
    let err: Error = RemoteError::Unavailable("timeout".to_string()).into();
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
    assert!(!err.is_user_error());
}

#[test]
fn details_include_validation_field() {
    let err: Error = ValidationError::new("recurrence.interval", "must be between 1 and 1000").into();
    let details = err.details().expect("details");
    assert_eq!(details["field"], Value::String("recurrence.interval".to_string()));
}

#[test]
fn json_error_includes_not_found_details() {
    let err = Error::not_found("task", "t9");
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert!(json.error.contains("task not found: t9"));
    let details = json.details.expect("details");
    assert_eq!(details["id"], Value::String("t9".to_string()));
}

#[test]
fn json_error_includes_remote_code() {
    let err: Error = RemoteError::Rejected {
        code: "23505".to_string(),
        message: "duplicate key".to_string(),
    }
    .into();
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::OPERATION_FAILED);
    assert_eq!(
        json.details.expect("details")["remote_code"],
        Value::String("23505".to_string())
    );
}
