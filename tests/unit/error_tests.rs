use specwright::AppError;

#[test]
fn display_prefixes_error_kind() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Stage("boom".into()).to_string(), "stage: boom");
    assert_eq!(
        AppError::Persistence("missing".into()).to_string(),
        "persistence: missing"
    );
    assert_eq!(AppError::Timeout("slow".into()).to_string(), "timeout: slow");
    assert_eq!(AppError::Disconnected.to_string(), "client disconnected");
    assert_eq!(AppError::Cancelled.to_string(), "cancelled by client");
}

#[test]
fn json_errors_are_persistence_errors() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("invalid json")
        .into();
    assert!(matches!(err, AppError::Persistence(_)));
}

#[test]
fn toml_errors_are_config_errors() {
    let err: AppError = toml::from_str::<toml::Value>("= nope")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn io_errors_keep_their_message() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    assert_eq!(AppError::from(io), AppError::Io("gone".into()));
}
