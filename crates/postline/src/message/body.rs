//! Lazy message bodies.
//!
//! A body is a single-pass sequence of byte chunks delivered over a bounded
//! channel. The consumer sees three outcomes from [`BodyStream::next`]:
//! a chunk, the end of the body (`None`), or a production failure.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Chunks buffered between producer and connection.
pub const DEFAULT_CAPACITY: usize = 16;

/// Consumer half of a message body.
#[derive(Debug)]
pub struct BodyStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

/// Producer half of a message body.
#[derive(Debug, Clone)]
pub struct BodyWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl BodyStream {
    /// Creates a connected producer/consumer pair.
    #[must_use]
    pub fn channel(capacity: usize) -> (BodyWriter, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (BodyWriter { tx }, Self { rx })
    }

    /// A body made of one fixed chunk.
    #[must_use]
    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        let (writer, stream) = Self::channel(1);
        let body = body.into();
        if !body.is_empty() {
            // Capacity 1 and a fresh channel: this cannot be full.
            let _ = writer.tx.try_send(Ok(body));
        }
        stream
    }

    /// Waits for the next chunk.
    ///
    /// Returns `None` once the producer has finished (dropped every writer).
    pub async fn next(&mut self) -> Option<io::Result<Bytes>> {
        self.rx.recv().await
    }
}

impl BodyWriter {
    /// Sends a chunk; returns false if the consumer has gone away.
    pub async fn chunk(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(chunk.into())).await.is_ok()
    }

    /// Ends the body with a production error.
    pub async fn fail(self, err: io::Error) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// Returns true if the consumer stopped reading.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
