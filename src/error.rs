use std::{fmt::Display, io, sync::Arc};

use parse_display::Display;
use serde_json::Value;

use super::{ErrorCode, ErrorObject, RawMessage};

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Protocol(String),
    #[error("failed to serialize: {0}")]
    Serialize(Arc<serde_json::Error>),
    #[error("failed to deserialize: {0}")]
    Deserialize(Arc<serde_json::Error>),
    #[error("{0}")]
    Handler(String),
}

impl Error {
    /// Creates an error for a local handler failure.
    ///
    /// When returned from a request handler, the peer receives an `InternalError` response
    /// carrying this message.
    pub fn msg(message: impl Display) -> Self {
        Error::Handler(message.to_string())
    }

    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Error::Response(e) => Some(e),
            _ => None,
        }
    }
    pub fn connection_error_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Error::Connection(e) => Some(e.kind),
            _ => None,
        }
    }

    pub(crate) fn into_response_error(self, method: &str) -> ResponseError {
        match self {
            Error::Response(e) => e,
            e => handler_failed(method, Some(e.to_string())),
        }
    }
}

pub(crate) fn handler_failed(method: &str, message: Option<String>) -> ResponseError {
    match message {
        Some(message) if !message.is_empty() => ResponseError::new(
            ErrorCode::INTERNAL_ERROR,
            format!("Request {method} failed with message: {message}"),
        ),
        _ => ResponseError::new(
            ErrorCode::INTERNAL_ERROR,
            format!("Request {method} failed unexpectedly without providing any details."),
        ),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ConnectionErrorKind {
    #[display("Connection is closed.")]
    Closed,
    #[display("Connection is disposed.")]
    Disposed,
    #[display("Connection is already listening")]
    AlreadyListening,
    #[display("Call listen() first.")]
    NotListening,
}

/// An operation was attempted in a connection state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind) -> Self {
        Self {
            kind,
            message: kind.to_string(),
        }
    }
    pub fn with_message(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ConnectionErrorKind> for Error {
    fn from(kind: ConnectionErrorKind) -> Self {
        Error::Connection(ConnectionError::new(kind))
    }
}

/// An error reported by the peer in a response message, or one to be sent to it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code,
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

impl From<ErrorObject> for ResponseError {
    fn from(e: ErrorObject) -> Self {
        Self {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}
impl From<ResponseError> for ErrorObject {
    fn from(e: ResponseError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
    #[error("failed to parse message: {0}")]
    Parse(Arc<serde_json::Error>),
    #[error("failed to serialize message: {0}")]
    Serialize(Arc<serde_json::Error>),
    #[error("transport is closed")]
    Closed,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(Arc::new(e))
    }
}

/// Payload of [`Connection::on_error`](crate::Connection::on_error).
///
/// Write failures carry the message that could not be written and the number of write
/// failures seen so far. Read failures carry neither.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub error: Error,
    pub message: Option<RawMessage>,
    pub count: Option<u32>,
}
