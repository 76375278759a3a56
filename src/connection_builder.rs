use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};

use crate::{
    Connection, ConnectionOptions, StreamMessageReader, StreamMessageWriter, message_channel,
};

impl Connection {
    /// Creates two connections wired to each other in memory.
    ///
    /// Neither connection is listening yet.
    pub fn new_channel(options: &ConnectionOptions) -> (Connection, Connection) {
        let (w0, r1) = message_channel();
        let (w1, r0) = message_channel();
        let c0 = Connection::new(r0, w0, options);
        let c1 = Connection::new(r1, w1, options);
        (c0, c1)
    }

    /// Creates a connection exchanging one JSON message per line over a byte stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream(
        reader: impl AsyncBufRead + Unpin + Send + 'static,
        writer: impl AsyncWrite + Unpin + Send + 'static,
        options: &ConnectionOptions,
    ) -> Connection {
        Connection::new(
            StreamMessageReader::new(reader),
            StreamMessageWriter::new(writer),
            options,
        )
    }

    pub fn from_stdio(options: &ConnectionOptions) -> Connection {
        Connection::from_stream(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            options,
        )
    }
}
