use std::sync::Arc;

use serde_json::Value;

use crate::{RequestMessage, ResponseError, Trace, Tracer};

/// Decides what happens to a request that is cancelled before it was dispatched.
pub trait CancellationStrategy: Send + Sync {
    /// Returns the response to send in place of dispatching `request`, or `None` to dispatch
    /// it normally.
    fn cancel_undispatched(&self, request: &RequestMessage)
    -> Option<Result<Value, ResponseError>>;
}

impl<F> CancellationStrategy for F
where
    F: Fn(&RequestMessage) -> Option<Result<Value, ResponseError>> + Send + Sync,
{
    fn cancel_undispatched(
        &self,
        request: &RequestMessage,
    ) -> Option<Result<Value, ResponseError>> {
        self(request)
    }
}

#[derive(Clone, Default)]
pub struct ConnectionOptions {
    pub cancellation_strategy: Option<Arc<dyn CancellationStrategy>>,
    pub trace: Trace,
    pub tracer: Option<Arc<dyn Tracer>>,
}
