//! Error display format and conversions.

use session_orchestrator::AppError;

#[test]
fn display_prefixes_the_error_kind() {
    let cases = [
        (AppError::NotFound("session abc".into()), "not found: session abc"),
        (
            AppError::InvalidState("session abc cannot move from PENDING to CREATING".into()),
            "invalid state: session abc cannot move from PENDING to CREATING",
        ),
        (
            AppError::SubmissionFailed("exit 1: bad partition".into()),
            "submission failed: exit 1: bad partition",
        ),
        (AppError::MonitorTimeout("job 7".into()), "monitor timeout: job 7"),
        (AppError::TunnelNotReady("port 8000".into()), "tunnel not ready: port 8000"),
        (AppError::TunnelCreateFailed("ssh".into()), "tunnel create failed: ssh"),
        (AppError::TunnelLost("port 8000".into()), "tunnel lost: port 8000"),
        (
            AppError::ResourceExhausted("no free tunnel port".into()),
            "resource exhausted: no free tunnel port",
        ),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn toml_errors_become_config_errors() {
    let err: AppError = toml::from_str::<toml::Value>("= nope")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn sqlx_errors_become_db_errors() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));
}
