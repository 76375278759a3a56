use std::{future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use serde::Serialize;
use serde_json::Value;

use crate::{
    CancellationToken, ConnectionContext, ErrorCode, Params, RequestId, ResponseError, Result,
    message::to_value,
};

pub(crate) type RequestHandler = dyn Fn(Params, RequestContext) -> Result<Response> + Send + Sync;
pub(crate) type StarRequestHandler =
    dyn Fn(&str, Params, RequestContext) -> Result<Response> + Send + Sync;
pub(crate) type NotificationHandler =
    dyn Fn(Params, NotificationContext) -> Result<()> + Send + Sync;
pub(crate) type StarNotificationHandler =
    dyn Fn(&str, Params, NotificationContext) -> Result<()> + Send + Sync;

pub(crate) struct HandlerEntry<H: ?Sized> {
    pub handler: Arc<H>,
    pub number_of_params: Option<usize>,
}
impl<H: ?Sized> Clone for HandlerEntry<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            number_of_params: self.number_of_params,
        }
    }
}

pub(crate) enum RawResponse {
    Immediate(Result<Value>),
    Deferred(BoxFuture<'static, Result<Value>>),
}

/// The outcome of a request handler: either a value available now, or a future that the
/// connection drives to completion before replying.
pub struct Response(pub(crate) RawResponse);

/// Passed to every request handler.
pub struct RequestContext {
    id: RequestId,
    method: String,
    token: CancellationToken,
    connection: ConnectionContext,
}

impl RequestContext {
    pub(crate) fn new(
        id: RequestId,
        method: String,
        token: CancellationToken,
        connection: ConnectionContext,
    ) -> Self {
        Self {
            id,
            method,
            token,
            connection,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Reports whether the peer asked to cancel this request.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
    pub fn connection(&self) -> ConnectionContext {
        self.connection.clone()
    }

    pub fn success<T>(self, result: &T) -> Result<Response>
    where
        T: Serialize,
    {
        Ok(Response(RawResponse::Immediate(to_value(result))))
    }
    pub fn handle<T>(self, result: Result<T>) -> Result<Response>
    where
        T: Serialize,
    {
        Ok(Response(RawResponse::Immediate(result.and_then(to_value))))
    }
    pub fn handle_async<T>(
        self,
        future: impl Future<Output = Result<T>> + Send + 'static,
    ) -> Result<Response>
    where
        T: Serialize + 'static,
    {
        Ok(Response(RawResponse::Deferred(
            future.map(|r| r.and_then(to_value)).boxed(),
        )))
    }
    pub fn method_not_found(self) -> Result<Response> {
        Err(method_not_found(&self.method).into())
    }
}

pub(crate) fn method_not_found(method: &str) -> ResponseError {
    ResponseError::new(
        ErrorCode::METHOD_NOT_FOUND,
        format!("Unhandled method {method}"),
    )
}

/// Passed to every notification handler.
pub struct NotificationContext {
    method: String,
    connection: ConnectionContext,
}

impl NotificationContext {
    pub(crate) fn new(method: String, connection: ConnectionContext) -> Self {
        Self { method, connection }
    }
    pub fn method(&self) -> &str {
        &self.method
    }
    pub fn connection(&self) -> ConnectionContext {
        self.connection.clone()
    }
}
