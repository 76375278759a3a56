use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
};

use super::{MessageBatch, TransportError};

/// The reading half of a transport.
///
/// `Ok(None)` means the transport has closed. An error is reported on the connection's error
/// event and reading continues.
pub trait MessageRead {
    fn read(&mut self) -> impl Future<Output = Result<Option<MessageBatch>, TransportError>> + Send;

    fn boxed(self) -> BoxMessageReader
    where
        Self: Sized + Send + 'static,
    {
        BoxMessageReader(Box::new(self))
    }
}
trait DynMessageRead {
    fn dyn_read<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<MessageBatch>, TransportError>> + Send + 'a>>;
}
impl<T: MessageRead> DynMessageRead for T {
    fn dyn_read<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<MessageBatch>, TransportError>> + Send + 'a>>
    {
        Box::pin(self.read())
    }
}
pub struct BoxMessageReader(Box<dyn DynMessageRead + Send + 'static>);
impl MessageRead for BoxMessageReader {
    fn read(&mut self) -> impl Future<Output = Result<Option<MessageBatch>, TransportError>> + Send {
        self.0.dyn_read()
    }
    fn boxed(self) -> BoxMessageReader
    where
        Self: Sized + Send + 'static,
    {
        self
    }
}

/// Reading half of an in-memory transport created by [`message_channel`](crate::message_channel).
pub struct ChannelMessageReader(pub(crate) mpsc::UnboundedReceiver<MessageBatch>);

impl MessageRead for ChannelMessageReader {
    async fn read(&mut self) -> Result<Option<MessageBatch>, TransportError> {
        Ok(self.0.recv().await)
    }
}

/// Reads one JSON message or batch per line.
///
/// A line that is not JSON, or a message that is malformed and has no `id`, is reported as
/// [`TransportError::Parse`] and skipped. A malformed message with an `id` is passed on
/// carrying only that `id`. An I/O error closes the reader.
pub struct StreamMessageReader<R> {
    reader: R,
    line: String,
    is_closed: bool,
}

impl<R> StreamMessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            is_closed: false,
        }
    }
}

impl<R> MessageRead for StreamMessageReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read(&mut self) -> Result<Option<MessageBatch>, TransportError> {
        loop {
            if self.is_closed {
                return Ok(None);
            }
            self.line.clear();
            match self.reader.read_line(&mut self.line).await {
                Ok(0) => {
                    self.is_closed = true;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => {
                    self.is_closed = true;
                    return Err(e.into());
                }
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str::<Value>(line)
                .and_then(MessageBatch::from_value_lenient)
                .map(Some)
                .map_err(|e| TransportError::Parse(Arc::new(e)));
        }
    }
}
