//! A bidirectional JSON-RPC 2.0 message connection.
//!
//! A [`Connection`] turns a transport that reads and writes discrete messages into a typed
//! request/response/notification API. Incoming messages are dispatched one at a time in
//! arrival order; outgoing requests are correlated with their responses by id.
use std::{
    collections::HashMap,
    future::Future,
    mem,
    panic::{AssertUnwindSafe, catch_unwind},
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, Weak},
    task::{Context, Poll, Waker},
    time::Instant,
};

use futures::FutureExt;
use parse_display::Display;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{spawn, task::JoinHandle};

mod cancellation;
mod connection_builder;
mod error;
mod event;
mod handler;
mod linked_map;
mod message;
mod message_read;
mod message_write;
mod options;
mod trace;
mod utils;

#[cfg(doctest)]
mod tests_readme;

pub use cancellation::*;
pub use error::*;
pub use event::*;
pub use handler::*;
pub use linked_map::*;
pub use message::*;
pub use message_read::*;
pub use message_write::*;
pub use options::*;
pub use trace::*;

use error::handler_failed;
use handler::{
    HandlerEntry, NotificationHandler, RawResponse, RequestHandler, StarNotificationHandler,
    StarRequestHandler, method_not_found,
};
use utils::{lock, panic_message, to_pretty_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ConnectionStatus {
    New,
    Listening,
    Closed,
    Disposed,
}

enum OutgoingRequestState {
    None,
    Waker(Waker),
    Ready(Result<Value>),
    End,
}
impl OutgoingRequestState {
    fn new() -> Self {
        Self::None
    }
    fn poll(&mut self, waker: &Waker) -> Poll<Result<Value>> {
        match self {
            Self::None | Self::Waker(_) => {
                *self = Self::Waker(waker.clone());
                Poll::Pending
            }
            Self::Ready(_) => match mem::replace(self, Self::End) {
                Self::Ready(r) => Poll::Ready(r),
                _ => unreachable!(),
            },
            Self::End => {
                panic!("poll after ready")
            }
        }
    }
    fn set_ready(&mut self, result: Result<Value>) {
        match mem::replace(self, Self::Ready(result)) {
            Self::None => {}
            Self::Waker(waker) => waker.wake(),
            old @ (Self::Ready(_) | Self::End) => *self = old,
        }
    }
}

struct PendingRequest {
    method: String,
    issue_time: Instant,
    state: Arc<Mutex<OutgoingRequestState>>,
    cancel_subscription: Option<Disposable>,
}
impl PendingRequest {
    fn settle(self, result: Result<Value>) {
        if let Some(d) = self.cancel_subscription {
            d.dispose();
        }
        lock(&self.state).set_ready(result);
    }
}

/// Resolves with the peer's response to a request sent by [`Connection::send_request`].
///
/// Dropping it forgets the request; a response that arrives later is ignored.
pub struct ResponseFuture {
    id: RequestId,
    state: Arc<Mutex<OutgoingRequestState>>,
    connection: Weak<RawConnection>,
}

impl ResponseFuture {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        lock(&self.state).poll(cx.waker())
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        let Some(c) = self.connection.upgrade() else {
            return;
        };
        let pending = c.lock().pending_requests.remove(&self.id);
        if let Some(d) = pending.and_then(|p| p.cancel_subscription) {
            d.dispose();
        }
    }
}

struct ConnectionState {
    status: ConnectionStatus,
    next_request_id: i64,
    notification_seq: u64,
    unknown_response_seq: u64,
    request_handlers: HashMap<String, HandlerEntry<RequestHandler>>,
    star_request_handler: Option<Arc<StarRequestHandler>>,
    notification_handlers: HashMap<String, HandlerEntry<NotificationHandler>>,
    star_notification_handler: Option<Arc<StarNotificationHandler>>,
    message_queue: LinkedMap<RawMessage>,
    is_tick_scheduled: bool,
    pending_requests: HashMap<RequestId, PendingRequest>,
    request_tokens: HashMap<RequestId, CancellationTokenSource>,
    trace: Trace,
    tracer: Option<Arc<dyn Tracer>>,
    write_error_count: u32,
    reader: Option<BoxMessageReader>,
    read_task: Option<JoinHandle<()>>,
}

impl ConnectionState {
    fn new(reader: BoxMessageReader, options: &ConnectionOptions) -> Self {
        Self {
            status: ConnectionStatus::New,
            next_request_id: 0,
            notification_seq: 0,
            unknown_response_seq: 0,
            request_handlers: HashMap::new(),
            star_request_handler: None,
            notification_handlers: HashMap::new(),
            star_notification_handler: None,
            message_queue: LinkedMap::new(),
            is_tick_scheduled: false,
            pending_requests: HashMap::new(),
            request_tokens: HashMap::new(),
            trace: options.trace,
            tracer: options.tracer.clone(),
            write_error_count: 0,
            reader: Some(reader),
            read_task: None,
        }
    }

    fn throw_if_closed_or_disposed(&self) -> Result<()> {
        match self.status {
            ConnectionStatus::Closed => Err(ConnectionErrorKind::Closed.into()),
            ConnectionStatus::Disposed => Err(ConnectionErrorKind::Disposed.into()),
            _ => Ok(()),
        }
    }
    fn throw_if_listening(&self) -> Result<()> {
        if self.status == ConnectionStatus::Listening {
            return Err(ConnectionErrorKind::AlreadyListening.into());
        }
        Ok(())
    }
    fn throw_if_not_listening(&self) -> Result<()> {
        if self.status != ConnectionStatus::Listening {
            return Err(ConnectionErrorKind::NotListening.into());
        }
        Ok(())
    }

    fn add_message_to_queue(&mut self, m: RawMessage) {
        let key = match &m.id {
            Some(Some(id)) if m.is_request() => request_queue_key(id),
            Some(Some(id)) if m.is_response() => format!("res-{id}"),
            Some(None) if m.is_response() => {
                self.unknown_response_seq += 1;
                format!("res-unknown-{}", self.unknown_response_seq)
            }
            _ => {
                self.notification_seq += 1;
                format!("not-{}", self.notification_seq)
            }
        };
        self.message_queue.set(key, m);
    }
}

fn request_queue_key(id: &RequestId) -> String {
    format!("req-{id}")
}
fn cancel_target(params: Option<&Value>) -> Option<RequestId> {
    params
        .and_then(|p| CancelParams::deserialize(p).ok())
        .map(|p| p.id)
}

pub(crate) struct RawConnection {
    state: Mutex<ConnectionState>,
    writer: Mutex<BoxMessageWriter>,
    cancellation_strategy: Option<Arc<dyn CancellationStrategy>>,
    error_emitter: Emitter<ErrorEvent>,
    close_emitter: Emitter<()>,
    unhandled_notification_emitter: Emitter<NotificationMessage>,
    dispose_emitter: Emitter<()>,
}

impl RawConnection {
    fn new(
        reader: BoxMessageReader,
        writer: BoxMessageWriter,
        options: &ConnectionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::new(reader, options)),
            writer: Mutex::new(writer),
            cancellation_strategy: options.cancellation_strategy.clone(),
            error_emitter: Emitter::new(),
            close_emitter: Emitter::new(),
            unhandled_notification_emitter: Emitter::new(),
            dispose_emitter: Emitter::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        lock(&self.state)
    }
    fn status(&self) -> ConnectionStatus {
        self.lock().status
    }
    fn is_disposed(&self) -> bool {
        self.status() == ConnectionStatus::Disposed
    }

    fn listen(self: &Arc<Self>) -> Result<()> {
        let reader = {
            let mut s = self.lock();
            s.throw_if_closed_or_disposed()?;
            s.throw_if_listening()?;
            s.status = ConnectionStatus::Listening;
            s.reader.take()
        };
        let Some(reader) = reader else {
            return Ok(());
        };
        let task = spawn(Self::read_loop(Arc::downgrade(self), reader));
        let mut s = self.lock();
        if s.status == ConnectionStatus::Disposed {
            task.abort();
        } else {
            s.read_task = Some(task);
        }
        tracing::debug!("connection is listening");
        Ok(())
    }

    async fn read_loop(connection: Weak<Self>, mut reader: BoxMessageReader) {
        loop {
            let r = reader.read().await;
            let Some(c) = connection.upgrade() else {
                return;
            };
            match r {
                Ok(Some(batch)) => {
                    for m in batch {
                        c.on_message(m);
                    }
                }
                Ok(None) => {
                    c.close_handler();
                    return;
                }
                Err(e) => {
                    tracing::warn!("failed to read message: {e}");
                    c.error_emitter.fire(&ErrorEvent {
                        error: e.into(),
                        message: None,
                        count: None,
                    });
                }
            }
        }
    }

    fn close_handler(&self) {
        let is_closed = {
            let mut s = self.lock();
            if matches!(
                s.status,
                ConnectionStatus::New | ConnectionStatus::Listening
            ) {
                s.status = ConnectionStatus::Closed;
                true
            } else {
                false
            }
        };
        if is_closed {
            tracing::debug!("connection closed");
            self.close_emitter.fire(&());
        }
    }

    fn on_message(self: &Arc<Self>, m: RawMessage) {
        if !self.cancel_undispatched(&m) {
            let mut s = self.lock();
            if s.status != ConnectionStatus::Disposed {
                s.add_message_to_queue(m);
            }
        }
        self.trigger_message_queue();
    }

    /// Answers a still-queued request on behalf of the cancellation strategy.
    fn cancel_undispatched(&self, m: &RawMessage) -> bool {
        if !m.is_notification() || m.method.as_deref() != Some(CANCEL_REQUEST_METHOD) {
            return false;
        }
        let Some(strategy) = &self.cancellation_strategy else {
            return false;
        };
        let Some(id) = cancel_target(m.params.as_ref()) else {
            return false;
        };
        let key = request_queue_key(&id);
        let queued = match self.lock().message_queue.get(&key) {
            Some(queued) => queued.clone(),
            None => return false,
        };
        let Ok(Message::Request(request)) = queued.classify() else {
            return false;
        };
        let Some(response) = strategy.cancel_undispatched(&request) else {
            return false;
        };
        if self.lock().message_queue.delete(&key).is_none() {
            return false;
        }
        let result = response.map_err(ErrorObject::from);
        self.trace_sending_response(&request.id, &result, &request.method, Instant::now());
        let _ = self.write_message(RawMessage::response(Some(request.id), result));
        true
    }

    fn trigger_message_queue(self: &Arc<Self>) {
        {
            let mut s = self.lock();
            if s.is_tick_scheduled || s.message_queue.is_empty() {
                return;
            }
            s.is_tick_scheduled = true;
        }
        let this = Arc::downgrade(self);
        spawn(async move {
            if let Some(this) = this.upgrade() {
                this.process_message_queue();
            }
        });
    }

    fn process_message_queue(self: &Arc<Self>) {
        let m = self.lock().message_queue.shift();
        if let Some((_, m)) = m {
            match m.classify() {
                Ok(Message::Request(m)) => self.handle_request(m),
                Ok(Message::Notification(m)) => self.handle_notification(m),
                Ok(Message::Response(m)) => self.handle_response(m),
                Err(m) => self.handle_invalid_message(m),
            }
        }
        self.lock().is_tick_scheduled = false;
        self.trigger_message_queue();
    }

    fn handle_request(self: &Arc<Self>, m: RequestMessage) {
        if self.is_disposed() {
            return;
        }
        self.trace_received_request(&m);
        let start = Instant::now();
        let (entry, star) = {
            let s = self.lock();
            (
                s.request_handlers.get(&m.method).cloned(),
                s.star_request_handler.clone(),
            )
        };
        if entry.is_none() && star.is_none() {
            self.reply(m.id, &m.method, Err(method_not_found(&m.method)), start);
            return;
        }
        let source = CancellationTokenSource::new();
        let token = source.token();
        let replaced = self.lock().request_tokens.insert(m.id.clone(), source);
        drop(replaced);

        let cx = RequestContext::new(
            m.id.clone(),
            m.method.clone(),
            token,
            ConnectionContext::new(self),
        );
        let number_of_params = entry.as_ref().and_then(|e| e.number_of_params);
        let params = Params::new(m.params.as_ref(), number_of_params);
        let result = catch_unwind(AssertUnwindSafe(|| match (&entry, &star) {
            (Some(e), _) => (e.handler)(params, cx),
            (None, Some(h)) => h(m.method.as_str(), params, cx),
            (None, None) => Err(method_not_found(&m.method).into()),
        }));
        match result {
            Ok(Ok(Response(RawResponse::Immediate(r)))) => {
                let r = r.map_err(|e| e.into_response_error(&m.method));
                self.finish_request(m.id, &m.method, r, start);
            }
            Ok(Ok(Response(RawResponse::Deferred(future)))) => {
                let this = Arc::downgrade(self);
                spawn(async move {
                    let r = match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(r) => r.map_err(|e| e.into_response_error(&m.method)),
                        Err(e) => Err(handler_failed(&m.method, panic_message(&*e))),
                    };
                    if let Some(this) = this.upgrade() {
                        this.finish_request(m.id, &m.method, r, start);
                    }
                });
            }
            Ok(Err(e)) => {
                let e = e.into_response_error(&m.method);
                self.finish_request(m.id, &m.method, Err(e), start);
            }
            Err(e) => {
                let e = handler_failed(&m.method, panic_message(&*e));
                self.finish_request(m.id, &m.method, Err(e), start);
            }
        }
    }

    fn finish_request(
        &self,
        id: RequestId,
        method: &str,
        result: Result<Value, ResponseError>,
        start: Instant,
    ) {
        let source = self.lock().request_tokens.remove(&id);
        drop(source);
        self.reply(id, method, result, start);
    }

    fn reply(
        &self,
        id: RequestId,
        method: &str,
        result: Result<Value, ResponseError>,
        start: Instant,
    ) {
        if self.is_disposed() {
            return;
        }
        let result = result.map_err(ErrorObject::from);
        self.trace_sending_response(&id, &result, method, start);
        let _ = self.write_message(RawMessage::response(Some(id), result));
    }

    fn handle_notification(self: &Arc<Self>, m: NotificationMessage) {
        if self.is_disposed() {
            return;
        }
        if m.method == CANCEL_REQUEST_METHOD {
            self.trace_received_notification(&m);
            if let Some(id) = cancel_target(m.params.as_ref()) {
                let source = self.lock().request_tokens.get(&id).cloned();
                if let Some(source) = source {
                    source.cancel();
                }
            }
            return;
        }
        if m.method == LOG_TRACE_NOTIFICATION_METHOD {
            self.log_trace(&m);
            return;
        }
        let (entry, star) = {
            let s = self.lock();
            (
                s.notification_handlers.get(&m.method).cloned(),
                s.star_notification_handler.clone(),
            )
        };
        if entry.is_none() && star.is_none() {
            self.unhandled_notification_emitter.fire(&m);
            return;
        }
        self.trace_received_notification(&m);
        let cx = NotificationContext::new(m.method.clone(), ConnectionContext::new(self));
        let number_of_params = entry.as_ref().and_then(|e| e.number_of_params);
        let params = Params::new(m.params.as_ref(), number_of_params);
        let result = catch_unwind(AssertUnwindSafe(|| match (&entry, &star) {
            (Some(e), _) => (e.handler)(params, cx),
            (None, Some(h)) => h(m.method.as_str(), params, cx),
            (None, None) => Ok(()),
        }));
        let message = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => panic_message(&*e),
        };
        match message {
            Some(message) if !message.is_empty() => tracing::error!(
                "Notification handler '{}' failed with message: {message}",
                m.method
            ),
            _ => tracing::error!("Notification handler '{}' failed unexpectedly.", m.method),
        }
    }

    fn handle_response(&self, m: ResponseMessage) {
        if self.is_disposed() {
            return;
        }
        let Some(id) = m.id else {
            match &m.result {
                Err(e) => tracing::error!(
                    "Received response message without id: Error is: \n{}",
                    to_pretty_json(e)
                ),
                Ok(_) => tracing::error!(
                    "Received response message without id. No further error information provided."
                ),
            }
            return;
        };
        let pending = self.lock().pending_requests.remove(&id);
        self.trace_received_response(&id, &m.result, pending.as_ref());
        if let Some(pending) = pending {
            pending.settle(m.result.map_err(|e| Error::Response(e.into())));
        }
    }

    fn handle_invalid_message(&self, m: RawMessage) {
        if m.is_empty() {
            tracing::error!("Received empty message.");
            return;
        }
        tracing::error!(
            "Received message which is neither a response nor a notification message:\n{}",
            to_pretty_json(&m)
        );
        if let Some(Some(id)) = &m.id {
            let pending = self.lock().pending_requests.remove(id);
            if let Some(pending) = pending {
                pending.settle(Err(Error::Protocol(
                    "The received response has neither a result nor an error property."
                        .to_string(),
                )));
            }
        }
    }

    fn write_message(&self, m: RawMessage) -> Result<(), TransportError> {
        let r = lock(&self.writer).write(&m);
        if let Err(e) = &r {
            tracing::warn!("failed to write message: {e}");
            let count = {
                let mut s = self.lock();
                s.write_error_count += 1;
                s.write_error_count
            };
            self.error_emitter.fire(&ErrorEvent {
                error: e.clone().into(),
                message: Some(m),
                count: Some(count),
            });
            if matches!(e, TransportError::Closed) {
                self.close_handler();
            }
        }
        r
    }

    fn send_request(
        self: &Arc<Self>,
        method: MethodType,
        args: impl Args,
        token: Option<&CancellationToken>,
    ) -> Result<ResponseFuture> {
        let params = method.compute_params(args.into_args()?);
        let (id, state) = {
            let mut s = self.lock();
            s.throw_if_closed_or_disposed()?;
            s.throw_if_not_listening()?;
            let id = RequestId::Number(s.next_request_id);
            s.next_request_id += 1;
            let state = Arc::new(Mutex::new(OutgoingRequestState::new()));
            s.pending_requests.insert(
                id.clone(),
                PendingRequest {
                    method: method.method().to_string(),
                    issue_time: Instant::now(),
                    state: state.clone(),
                    cancel_subscription: None,
                },
            );
            (id, state)
        };
        self.trace_sending_request(&id, method.method(), params.as_ref());
        let m = RawMessage::request(id.clone(), method.method(), params);
        if let Err(e) = self.write_message(m) {
            let pending = self.lock().pending_requests.remove(&id);
            if let Some(pending) = pending {
                let e = ResponseError::new(ErrorCode::MESSAGE_WRITE_ERROR, e.to_string());
                pending.settle(Err(e.into()));
            }
        } else if let Some(token) = token {
            let this = Arc::downgrade(self);
            let cancel_id = id.clone();
            let subscription = token.on_cancellation_requested(move || {
                if let Some(this) = this.upgrade() {
                    let params = CancelParams { id: cancel_id };
                    let method = MethodType::typed(CANCEL_REQUEST_METHOD, 1);
                    if let Err(e) = this.send_notification(method, (params,)) {
                        tracing::debug!("failed to send cancellation: {e}");
                    }
                }
            });
            let mut s = self.lock();
            if let Some(pending) = s.pending_requests.get_mut(&id) {
                pending.cancel_subscription = Some(subscription);
            } else {
                drop(s);
                subscription.dispose();
            }
        }
        Ok(ResponseFuture {
            id,
            state,
            connection: Arc::downgrade(self),
        })
    }

    fn send_notification(&self, method: MethodType, args: impl Args) -> Result<()> {
        let params = method.compute_params(args.into_args()?);
        self.lock().throw_if_closed_or_disposed()?;
        self.trace_send_notification(method.method(), params.as_ref());
        let _ = self.write_message(RawMessage::notification(method.method(), params));
        Ok(())
    }

    fn set_trace(
        &self,
        value: Trace,
        tracer: Option<Arc<dyn Tracer>>,
        send_notification: bool,
    ) -> Result<()> {
        let send_notification = {
            let mut s = self.lock();
            s.trace = value;
            s.tracer = if value == Trace::Off { None } else { tracer };
            send_notification
                && !matches!(
                    s.status,
                    ConnectionStatus::Closed | ConnectionStatus::Disposed
                )
        };
        if send_notification {
            let method = MethodType::typed(SET_TRACE_NOTIFICATION_METHOD, 1);
            self.send_notification(method, (SetTraceParams { value },))?;
        }
        Ok(())
    }

    fn dispose(&self) {
        let mut s = self.lock();
        if s.status == ConnectionStatus::Disposed {
            return;
        }
        s.status = ConnectionStatus::Disposed;
        let pending = mem::take(&mut s.pending_requests);
        let read_task = s.read_task.take();
        // Tables hold user closures; they must be dropped after the lock is released.
        let released = (
            mem::take(&mut s.request_tokens),
            mem::take(&mut s.message_queue),
            mem::take(&mut s.request_handlers),
            s.star_request_handler.take(),
            mem::take(&mut s.notification_handlers),
            s.star_notification_handler.take(),
            s.reader.take(),
        );
        drop(s);
        drop(released);

        tracing::debug!("connection disposed");
        self.dispose_emitter.fire(&());
        let error = Error::Connection(ConnectionError::with_message(
            ConnectionErrorKind::Disposed,
            "Connection got disposed.",
        ));
        for (_, pending) in pending {
            pending.settle(Err(error.clone()));
        }
        lock(&self.writer).dispose();
        if let Some(task) = read_task {
            task.abort();
        }
        self.error_emitter.dispose();
        self.close_emitter.dispose();
        self.unhandled_notification_emitter.dispose();
        self.dispose_emitter.dispose();
    }
}

// Protocol tracing
impl RawConnection {
    fn tracer(&self) -> Option<(Trace, Arc<dyn Tracer>)> {
        let s = self.lock();
        match (&s.tracer, s.trace) {
            (_, Trace::Off) | (None, _) => None,
            (Some(tracer), trace) => Some((trace, tracer.clone())),
        }
    }

    fn trace_sending_request(&self, id: &RequestId, method: &str, params: Option<&Value>) {
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let data = match (trace, params) {
            (Trace::Verbose, Some(params)) => Some(params_data(params)),
            _ => None,
        };
        tracer.log(
            &format!("Sending request '{method} - ({id})'."),
            data.as_deref(),
        );
    }

    fn trace_send_notification(&self, method: &str, params: Option<&Value>) {
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let data = match (trace, params) {
            (Trace::Verbose, Some(params)) => Some(params_data(params)),
            (Trace::Verbose, None) => Some("No parameters provided.\n\n".to_string()),
            _ => None,
        };
        tracer.log(&format!("Sending notification '{method}'."), data.as_deref());
    }

    fn trace_sending_response(
        &self,
        id: &RequestId,
        result: &Result<Value, ErrorObject>,
        method: &str,
        start: Instant,
    ) {
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let data = if trace == Trace::Verbose {
            result_data(result)
        } else {
            None
        };
        tracer.log(
            &format!(
                "Sending response '{method} - ({id})'. Processing request took {}ms",
                start.elapsed().as_millis()
            ),
            data.as_deref(),
        );
    }

    fn trace_received_request(&self, m: &RequestMessage) {
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let data = match (trace, &m.params) {
            (Trace::Verbose, Some(params)) => Some(params_data(params)),
            _ => None,
        };
        tracer.log(
            &format!("Received request '{} - ({})'.", m.method, m.id),
            data.as_deref(),
        );
    }

    fn trace_received_notification(&self, m: &NotificationMessage) {
        if m.method == LOG_TRACE_NOTIFICATION_METHOD {
            return;
        }
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let data = match (trace, &m.params) {
            (Trace::Verbose, Some(params)) => Some(params_data(params)),
            (Trace::Verbose, None) => Some("No parameters provided.\n\n".to_string()),
            _ => None,
        };
        tracer.log(
            &format!("Received notification '{}'.", m.method),
            data.as_deref(),
        );
    }

    fn trace_received_response(
        &self,
        id: &RequestId,
        result: &Result<Value, ErrorObject>,
        pending: Option<&PendingRequest>,
    ) {
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let data = if trace == Trace::Verbose {
            result_data(result)
        } else {
            None
        };
        let message = if let Some(p) = pending {
            let error = match result {
                Err(e) => format!(" Request failed: {} ({}).", e.message, e.code),
                Ok(_) => String::new(),
            };
            format!(
                "Received response '{} - ({id})' in {}ms.{error}",
                p.method,
                p.issue_time.elapsed().as_millis()
            )
        } else {
            format!("Received response {id} without active response promise.")
        };
        tracer.log(&message, data.as_deref());
    }

    fn log_trace(&self, m: &NotificationMessage) {
        let Some((trace, tracer)) = self.tracer() else {
            return;
        };
        let Some(params) = m
            .params
            .as_ref()
            .and_then(|p| LogTraceParams::deserialize(p).ok())
        else {
            return;
        };
        let verbose = if trace == Trace::Verbose {
            params.verbose.as_deref()
        } else {
            None
        };
        tracer.log(&params.message, verbose);
    }
}

fn params_data(params: &Value) -> String {
    format!("Params: {}\n\n", to_pretty_json(params))
}
fn result_data(result: &Result<Value, ErrorObject>) -> Option<String> {
    match result {
        Err(ErrorObject {
            data: Some(data), ..
        }) => Some(format!("Error data: {}\n\n", to_pretty_json(data))),
        Err(_) => None,
        Ok(Value::Null) => Some("No result returned.\n\n".to_string()),
        Ok(result) => Some(format!("Result: {}\n\n", to_pretty_json(result))),
    }
}

/// A weak handle to a connection, usable from inside handlers.
///
/// Operations fail with [`ConnectionErrorKind::Disposed`] once the connection is gone.
#[derive(Clone)]
pub struct ConnectionContext(Weak<RawConnection>);

impl ConnectionContext {
    fn new(connection: &Arc<RawConnection>) -> Self {
        Self(Arc::downgrade(connection))
    }
    fn get(&self) -> Result<Arc<RawConnection>> {
        self.0
            .upgrade()
            .ok_or_else(|| ConnectionErrorKind::Disposed.into())
    }

    pub fn send_request(
        &self,
        method: impl Into<MethodType>,
        args: impl Args,
        token: Option<&CancellationToken>,
    ) -> Result<ResponseFuture> {
        self.get()?.send_request(method.into(), args, token)
    }
    pub async fn request<T>(&self, method: impl Into<MethodType>, args: impl Args) -> Result<T>
    where
        T: DeserializeOwned,
    {
        from_result_value(self.send_request(method, args, None)?.await?)
    }
    pub fn send_notification(&self, method: impl Into<MethodType>, args: impl Args) -> Result<()> {
        self.get()?.send_notification(method.into(), args)
    }
}

fn from_result_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Deserialize(Arc::new(e)))
}

/// A JSON-RPC connection over a message transport.
///
/// Dropping the connection disposes it.
pub struct Connection(Arc<RawConnection>);

impl Connection {
    pub fn new(
        reader: impl MessageRead + Send + 'static,
        writer: impl MessageWrite + Send + 'static,
        options: &ConnectionOptions,
    ) -> Self {
        Self(RawConnection::new(reader.boxed(), writer.boxed(), options))
    }

    pub fn context(&self) -> ConnectionContext {
        ConnectionContext::new(&self.0)
    }
    pub fn status(&self) -> ConnectionStatus {
        self.0.status()
    }

    /// Starts reading messages from the transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(&self) -> Result<()> {
        self.0.listen()
    }

    /// Sends a request and returns a future for its response.
    ///
    /// The request is written before this function returns. If `token` is cancelled later,
    /// `$/cancelRequest` is sent to the peer; the returned future still waits for the peer's
    /// response.
    pub fn send_request(
        &self,
        method: impl Into<MethodType>,
        args: impl Args,
        token: Option<&CancellationToken>,
    ) -> Result<ResponseFuture> {
        self.0.send_request(method.into(), args, token)
    }

    pub async fn request<T>(&self, method: impl Into<MethodType>, args: impl Args) -> Result<T>
    where
        T: DeserializeOwned,
    {
        from_result_value(self.send_request(method, args, None)?.await?)
    }

    /// Sends a notification.
    ///
    /// Transport failures are reported through [`on_error`](Self::on_error), not as the
    /// return value.
    pub fn send_notification(&self, method: impl Into<MethodType>, args: impl Args) -> Result<()> {
        self.0.send_notification(method.into(), args)
    }

    pub fn on_request(
        &self,
        method: impl Into<MethodType>,
        handler: impl Fn(Params, RequestContext) -> Result<Response> + Send + Sync + 'static,
    ) -> Result<()> {
        let method = method.into();
        let handler: Arc<RequestHandler> = Arc::new(handler);
        let replaced = {
            let mut s = self.0.lock();
            s.throw_if_closed_or_disposed()?;
            s.request_handlers.insert(
                method.method().to_string(),
                HandlerEntry {
                    handler,
                    number_of_params: method.number_of_params(),
                },
            )
        };
        drop(replaced);
        Ok(())
    }

    /// Registers the handler for requests whose method has no handler of its own.
    pub fn on_any_request(
        &self,
        handler: impl Fn(&str, Params, RequestContext) -> Result<Response> + Send + Sync + 'static,
    ) -> Result<()> {
        let handler: Arc<StarRequestHandler> = Arc::new(handler);
        let replaced = {
            let mut s = self.0.lock();
            s.throw_if_closed_or_disposed()?;
            s.star_request_handler.replace(handler)
        };
        drop(replaced);
        Ok(())
    }

    pub fn on_notification(
        &self,
        method: impl Into<MethodType>,
        handler: impl Fn(Params, NotificationContext) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        let method = method.into();
        let handler: Arc<NotificationHandler> = Arc::new(handler);
        let replaced = {
            let mut s = self.0.lock();
            s.throw_if_closed_or_disposed()?;
            s.notification_handlers.insert(
                method.method().to_string(),
                HandlerEntry {
                    handler,
                    number_of_params: method.number_of_params(),
                },
            )
        };
        drop(replaced);
        Ok(())
    }

    /// Registers the handler for notifications whose method has no handler of its own.
    pub fn on_any_notification(
        &self,
        handler: impl Fn(&str, Params, NotificationContext) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        let handler: Arc<StarNotificationHandler> = Arc::new(handler);
        let replaced = {
            let mut s = self.0.lock();
            s.throw_if_closed_or_disposed()?;
            s.star_notification_handler.replace(handler)
        };
        drop(replaced);
        Ok(())
    }

    /// Sets the trace level and sink. With `send_notification`, the new level is announced
    /// to the peer with `$/setTraceNotification`.
    pub fn trace(
        &self,
        value: Trace,
        tracer: Option<Arc<dyn Tracer>>,
        send_notification: bool,
    ) -> Result<()> {
        self.0.set_trace(value, tracer, send_notification)
    }

    /// Disposes the connection, failing every pending request.
    ///
    /// Calling it again has no effect.
    pub fn dispose(&self) {
        self.0.dispose()
    }

    pub fn on_error(&self, listener: impl Fn(&ErrorEvent) + Send + Sync + 'static) -> Disposable {
        self.0.error_emitter.event(listener)
    }
    pub fn on_close(&self, listener: impl Fn(&()) + Send + Sync + 'static) -> Disposable {
        self.0.close_emitter.event(listener)
    }
    pub fn on_unhandled_notification(
        &self,
        listener: impl Fn(&NotificationMessage) + Send + Sync + 'static,
    ) -> Disposable {
        self.0.unhandled_notification_emitter.event(listener)
    }
    pub fn on_dispose(&self, listener: impl Fn(&()) + Send + Sync + 'static) -> Disposable {
        self.0.dispose_emitter.event(listener)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.0.dispose();
    }
}
