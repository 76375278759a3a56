use jsonlink::{
    ConnectionError, ConnectionErrorKind, Error, ErrorCode, ErrorObject, ResponseError,
    TransportError,
};
use serde_json::json;

#[test]
fn connection_error_messages() {
    let e = Error::from(ConnectionErrorKind::NotListening);
    assert_eq!(e.to_string(), "Call listen() first.");
    assert_eq!(
        e.connection_error_kind(),
        Some(ConnectionErrorKind::NotListening)
    );
    assert_eq!(
        Error::from(ConnectionErrorKind::Closed).to_string(),
        "Connection is closed."
    );
    let e = ConnectionError::with_message(ConnectionErrorKind::Disposed, "gone");
    assert_eq!(e.to_string(), "gone");
    assert_eq!(e.kind, ConnectionErrorKind::Disposed);
}

#[test]
fn response_error_round_trip_keeps_data() {
    let e = ResponseError::new(ErrorCode::INVALID_PARAMS, "bad").with_data(json!([1]));
    let eo = e.to_error_object();
    assert_eq!(
        serde_json::to_value(&eo).unwrap(),
        json!({"code": -32602, "message": "bad", "data": [1]})
    );
    assert_eq!(ResponseError::from(eo), e);
}

#[test]
fn error_object_without_data() {
    let eo: ErrorObject =
        serde_json::from_value(json!({"code": -32603, "message": "x"})).unwrap();
    assert_eq!(eo.data, None);
    assert_eq!(eo.code, ErrorCode::INTERNAL_ERROR);
    assert_eq!(
        serde_json::to_value(&eo).unwrap(),
        json!({"code": -32603, "message": "x"})
    );
}

#[test]
fn response_error_accessor() {
    let e = Error::from(ResponseError::new(ErrorCode(5), "custom"));
    assert_eq!(e.to_string(), "custom");
    assert_eq!(e.response_error().map(|e| e.code), Some(ErrorCode(5)));
    assert_eq!(e.connection_error_kind(), None);
    assert!(Error::msg("x").response_error().is_none());
}

#[test]
fn error_code_messages() {
    assert_eq!(ErrorCode::METHOD_NOT_FOUND.message(), "Method not found");
    assert_eq!(ErrorCode(-32050).message(), "Server error");
    assert_eq!(ErrorCode::MESSAGE_WRITE_ERROR.0, 1);
    assert_eq!(ErrorCode::MESSAGE_READ_ERROR.0, 2);
    assert_eq!(ErrorCode(7).message(), "Unknown error");
}

#[test]
fn transport_error_from_io() {
    let e = Error::from(TransportError::from(std::io::Error::other("broken")));
    assert!(matches!(e, Error::Transport(TransportError::Io(_))));
    assert!(e.to_string().contains("broken"));
}
