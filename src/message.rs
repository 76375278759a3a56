use std::fmt;
use std::sync::Arc;

use derive_ex::derive_ex;
use ordered_float::OrderedFloat;
use parse_display::Display;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Error, ResponseError, Result};

#[cfg(test)]
mod tests;

pub const JSONRPC_VERSION: &str = "2.0";

pub const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";
pub const SET_TRACE_NOTIFICATION_METHOD: &str = "$/setTraceNotification";
pub const LOG_TRACE_NOTIFICATION_METHOD: &str = "$/logTraceNotification";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[derive_ex(Eq, PartialEq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Float(#[eq(key = OrderedFloat($))] f64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Float(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}
impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}
impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum MessageBatch {
    Single(RawMessage),
    Batch(Vec<RawMessage>),
}
impl IntoIterator for MessageBatch {
    type Item = RawMessage;
    type IntoIter = MessageBatchIter;
    fn into_iter(self) -> Self::IntoIter {
        match self {
            MessageBatch::Single(msg) => MessageBatchIter::One(Some(msg)),
            MessageBatch::Batch(vec) => MessageBatchIter::Many(vec.into_iter()),
        }
    }
}
impl MessageBatch {
    /// Decodes a message or batch from an already parsed JSON value.
    ///
    /// A message whose members have the wrong shape is kept with only its `id`, so that the
    /// pending request it answers can still be failed. Without a usable `id` it is an error.
    pub(crate) fn from_value_lenient(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(RawMessage::from_value_lenient)
                .collect::<Result<Vec<_>, _>>()
                .map(MessageBatch::Batch),
            value => RawMessage::from_value_lenient(value).map(MessageBatch::Single),
        }
    }
}
impl From<RawMessage> for MessageBatch {
    fn from(msg: RawMessage) -> Self {
        MessageBatch::Single(msg)
    }
}

pub enum MessageBatchIter {
    One(Option<RawMessage>),
    Many(std::vec::IntoIter<RawMessage>),
}
impl Iterator for MessageBatchIter {
    type Item = RawMessage;
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            MessageBatchIter::One(msg) => msg.take(),
            MessageBatchIter::Many(iter) => iter.next(),
        }
    }
}

/// A decoded JSON-RPC message whose shape has not been checked yet.
///
/// `id` distinguishes an absent id (`None`) from an explicit `null` (`Some(None)`), and
/// `result` distinguishes an absent result (`None`) from a `null` result (`Some(Value::Null)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Option<RequestId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl Default for RawMessage {
    fn default() -> Self {
        RawMessage {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

impl RawMessage {
    fn from_value_lenient(value: Value) -> Result<Self, serde_json::Error> {
        let e = match RawMessage::deserialize(&value) {
            Ok(m) => return Ok(m),
            Err(e) => e,
        };
        match value.get("id").map(RequestId::deserialize) {
            Some(Ok(id)) => Ok(RawMessage {
                id: Some(Some(id)),
                ..RawMessage::default()
            }),
            _ => Err(e),
        }
    }

    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(Some(id)),
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }
    pub fn response(id: Option<RequestId>, result: Result<Value, ErrorObject>) -> Self {
        let mut m = Self {
            id: Some(id),
            ..Self::default()
        };
        match result {
            Ok(value) => m.result = Some(value),
            Err(e) => m.error = Some(e),
        }
        m
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some() && matches!(self.id, Some(Some(_)))
    }
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }
    pub fn is_response(&self) -> bool {
        self.id.is_some() && (self.result.is_some() || self.error.is_some())
    }
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.method.is_none()
            && self.params.is_none()
            && self.result.is_none()
            && self.error.is_none()
    }

    /// Classifies the message, returning it unchanged if it is neither a request, a
    /// notification nor a response.
    ///
    /// A response carrying both `result` and `error` is treated as an error response.
    pub fn classify(self) -> Result<Message, RawMessage> {
        match self {
            RawMessage {
                id: Some(Some(id)),
                method: Some(method),
                params,
                ..
            } => Ok(Message::Request(RequestMessage { id, method, params })),
            RawMessage {
                id: None,
                method: Some(method),
                params,
                ..
            } => Ok(Message::Notification(NotificationMessage { method, params })),
            RawMessage {
                id: Some(id),
                error: Some(error),
                ..
            } => Ok(Message::Response(ResponseMessage {
                id,
                result: Err(error),
            })),
            RawMessage {
                id: Some(id),
                result: Some(result),
                ..
            } => Ok(Message::Response(ResponseMessage {
                id,
                result: Ok(result),
            })),
            m => Err(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Notification(NotificationMessage),
    Response(ResponseMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub method: String,
    pub params: Option<Value>,
}
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub id: Option<RequestId>,
    pub result: Result<Value, ErrorObject>,
}

impl From<RequestMessage> for RawMessage {
    fn from(m: RequestMessage) -> Self {
        RawMessage::request(m.id, m.method, m.params)
    }
}
impl From<NotificationMessage> for RawMessage {
    fn from(m: NotificationMessage) -> Self {
        RawMessage::notification(m.method, m.params)
    }
}
impl From<ResponseMessage> for RawMessage {
    fn from(m: ResponseMessage) -> Self {
        RawMessage::response(m.id, m.result)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{0}")]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);
    pub const SERVER_ERROR_START: Self = Self(-32099);
    pub const SERVER_ERROR_END: Self = Self(-32000);
    pub const UNKNOWN_ERROR_CODE: Self = Self(-32001);

    /// A message could not be written to the transport.
    pub const MESSAGE_WRITE_ERROR: Self = Self(1);
    /// A message could not be read from the transport.
    pub const MESSAGE_READ_ERROR: Self = Self(2);

    pub fn message(self) -> &'static str {
        match self {
            Self::PARSE_ERROR => "Parse error",
            Self::INVALID_REQUEST => "Invalid Request",
            Self::METHOD_NOT_FOUND => "Method not found",
            Self::INVALID_PARAMS => "Invalid params",
            Self::INTERNAL_ERROR => "Internal error",
            Self::MESSAGE_WRITE_ERROR => "Message write error",
            Self::MESSAGE_READ_ERROR => "Message read error",
            _ if Self::SERVER_ERROR_START.0 <= self.0 && self.0 <= Self::SERVER_ERROR_END.0 => {
                "Server error"
            }
            _ => "Unknown error",
        }
    }
}

/// Identifies a method, either by bare name or by a descriptor that also declares how many
/// positional parameters the method takes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodType {
    Name(String),
    Typed {
        method: String,
        number_of_params: usize,
    },
}

impl MethodType {
    pub fn typed(method: impl Into<String>, number_of_params: usize) -> Self {
        MethodType::Typed {
            method: method.into(),
            number_of_params,
        }
    }
    pub fn method(&self) -> &str {
        match self {
            MethodType::Name(method) | MethodType::Typed { method, .. } => method,
        }
    }
    pub fn number_of_params(&self) -> Option<usize> {
        match self {
            MethodType::Name(_) => None,
            MethodType::Typed {
                number_of_params, ..
            } => Some(*number_of_params),
        }
    }

    /// Builds the `params` member of an outgoing message from positional arguments.
    ///
    /// A typed descriptor always yields exactly its declared number of positional
    /// parameters; missing trailing arguments become `null` and excess ones are dropped.
    pub fn compute_params(&self, mut args: Vec<Value>) -> Option<Value> {
        match self.number_of_params() {
            None => match args.len() {
                0 => None,
                1 => args.pop(),
                _ => Some(Value::Array(args)),
            },
            Some(0) => None,
            Some(1) => Some(args.into_iter().next().unwrap_or(Value::Null)),
            Some(n) => {
                args.resize(n, Value::Null);
                Some(Value::Array(args))
            }
        }
    }
}

impl From<&str> for MethodType {
    fn from(method: &str) -> Self {
        MethodType::Name(method.to_string())
    }
}
impl From<String> for MethodType {
    fn from(method: String) -> Self {
        MethodType::Name(method)
    }
}
impl From<&MethodType> for MethodType {
    fn from(method: &MethodType) -> Self {
        method.clone()
    }
}

/// Positional arguments of an outgoing request or notification.
pub trait Args {
    fn into_args(self) -> Result<Vec<Value>>;
}

pub(crate) fn to_value(value: impl Serialize) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialize(Arc::new(e)))
}

impl Args for () {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}
impl<T: Serialize> Args for Vec<T> {
    fn into_args(self) -> Result<Vec<Value>> {
        self.into_iter().map(to_value).collect()
    }
}
impl<T: Serialize, const N: usize> Args for [T; N] {
    fn into_args(self) -> Result<Vec<Value>> {
        self.into_iter().map(to_value).collect()
    }
}

macro_rules! impl_args_for_tuple {
    ($($t:ident),*) => {
        impl<$($t: Serialize),*> Args for ($($t,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>> {
                let ($($t,)*) = self;
                Ok(vec![$(to_value($t)?),*])
            }
        }
    };
}
impl_args_for_tuple!(A0);
impl_args_for_tuple!(A0, A1);
impl_args_for_tuple!(A0, A1, A2);
impl_args_for_tuple!(A0, A1, A2, A3);
impl_args_for_tuple!(A0, A1, A2, A3, A4);

static NULL: Value = Value::Null;

/// Parameters of an incoming request or notification, as seen by its handler.
#[derive(Clone, Copy, Debug)]
pub struct Params<'a> {
    value: Option<&'a Value>,
    number_of_params: Option<usize>,
}

impl<'a> Params<'a> {
    pub(crate) fn new(value: Option<&'a Value>, number_of_params: Option<usize>) -> Self {
        let value = if number_of_params == Some(0) {
            None
        } else {
            value
        };
        Self {
            value,
            number_of_params,
        }
    }

    pub fn raw(&self) -> Option<&'a Value> {
        self.value
    }
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    fn spread(&self) -> Option<&'a Vec<Value>> {
        match self.value {
            Some(Value::Array(items)) if self.number_of_params.is_none_or(|n| n > 1) => {
                Some(items)
            }
            _ => None,
        }
    }

    /// Number of positional arguments the handler receives.
    pub fn len(&self) -> usize {
        match (self.spread(), self.value) {
            (Some(items), _) => items.len(),
            (None, Some(_)) => 1,
            (None, None) => 0,
        }
    }

    /// Deserializes the positional argument at `index`.
    ///
    /// Array params are spread into positional arguments unless the method was registered
    /// with a descriptor declaring a single parameter; any other params value is argument 0.
    /// Missing arguments read as `null`.
    pub fn arg<T>(&self, index: usize) -> Result<T>
    where
        T: Deserialize<'a>,
    {
        let value = match (self.spread(), self.value) {
            (Some(items), _) => items.get(index),
            (None, Some(value)) if index == 0 => Some(value),
            _ => None,
        };
        deserialize_param(value.unwrap_or(&NULL))
    }

    pub fn to<T>(&self) -> Result<T>
    where
        T: Deserialize<'a>,
    {
        if let Some(p) = self.to_opt()? {
            Ok(p)
        } else {
            Err(invalid_params("Params is missing.".to_string()))
        }
    }
    pub fn to_opt<T>(&self) -> Result<Option<T>>
    where
        T: Deserialize<'a>,
    {
        match self.value {
            Some(p) => deserialize_param(p).map(Some),
            None => Ok(None),
        }
    }
}

fn deserialize_param<'a, T: Deserialize<'a>>(value: &'a Value) -> Result<T> {
    T::deserialize(value).map_err(|e| invalid_params(e.to_string()))
}
fn invalid_params(message: String) -> Error {
    Error::Response(ResponseError::new(ErrorCode::INVALID_PARAMS, message))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}
