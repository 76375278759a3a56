use std::{
    io,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    spawn,
    sync::mpsc,
};

use super::{ChannelMessageReader, MessageBatch, RawMessage, TransportError};
use crate::utils::lock;

/// The writing half of a transport.
///
/// `write` is synchronous so that messages reach the transport in call order. A transport
/// that cannot accept more messages returns [`TransportError::Closed`].
pub trait MessageWrite {
    fn write(&mut self, message: &RawMessage) -> Result<(), TransportError>;

    /// Releases the transport. Later writes fail.
    fn dispose(&mut self) {}

    fn boxed(self) -> BoxMessageWriter
    where
        Self: Sized + Send + 'static,
    {
        BoxMessageWriter(Box::new(self))
    }
}

pub struct BoxMessageWriter(Box<dyn MessageWrite + Send + 'static>);
impl MessageWrite for BoxMessageWriter {
    fn write(&mut self, message: &RawMessage) -> Result<(), TransportError> {
        self.0.write(message)
    }
    fn dispose(&mut self) {
        self.0.dispose()
    }
    fn boxed(self) -> BoxMessageWriter
    where
        Self: Sized + Send + 'static,
    {
        self
    }
}

/// Writing half of an in-memory transport created by [`message_channel`].
pub struct ChannelMessageWriter(Option<mpsc::UnboundedSender<MessageBatch>>);

impl ChannelMessageWriter {
    pub fn send(&self, batch: impl Into<MessageBatch>) -> Result<(), TransportError> {
        let Some(tx) = &self.0 else {
            return Err(TransportError::Closed);
        };
        tx.send(batch.into()).map_err(|_| TransportError::Closed)
    }
}

impl MessageWrite for ChannelMessageWriter {
    fn write(&mut self, message: &RawMessage) -> Result<(), TransportError> {
        self.send(message.clone())
    }
    fn dispose(&mut self) {
        self.0 = None;
    }
}

/// Creates an in-memory transport. Messages written to the writer are read from the reader.
pub fn message_channel() -> (ChannelMessageWriter, ChannelMessageReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelMessageWriter(Some(tx)), ChannelMessageReader(rx))
}

/// Writes one JSON message per line from a background task.
///
/// Must be created inside a tokio runtime. If the underlying writer fails, the next write
/// returns that I/O error and the writes after it return [`TransportError::Closed`].
pub struct StreamMessageWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
    failure: Arc<Mutex<Option<io::Error>>>,
}

impl StreamMessageWriter {
    pub fn new(writer: impl AsyncWrite + Unpin + Send + 'static) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let failure = Arc::new(Mutex::new(None));
        let task_failure = failure.clone();
        spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                if let Err(e) = write_line(&mut writer, &line).await {
                    tracing::warn!("failed to write message: {e}");
                    *lock(&task_failure) = Some(e);
                    break;
                }
            }
        });
        Self {
            tx: Some(tx),
            failure,
        }
    }
}

async fn write_line(writer: &mut (impl AsyncWrite + Unpin), line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

impl MessageWrite for StreamMessageWriter {
    fn write(&mut self, message: &RawMessage) -> Result<(), TransportError> {
        if let Some(e) = lock(&self.failure).take() {
            self.tx = None;
            return Err(e.into());
        }
        let Some(tx) = &self.tx else {
            return Err(TransportError::Closed);
        };
        let mut line =
            serde_json::to_string(message).map_err(|e| TransportError::Serialize(Arc::new(e)))?;
        line.push('\n');
        tx.send(line).map_err(|_| TransportError::Closed)
    }
    fn dispose(&mut self) {
        self.tx = None;
    }
}
