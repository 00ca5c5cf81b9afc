//! Stream abstractions the framework consumes.
//!
//! Framing and connection management belong to the transport. By the
//! time bytes reach Stratus they are whole messages, delivered through a
//! [`StreamReceiver`] and written back through a [`StreamSender`].

use std::future::Future;
use std::pin::Pin;

use ntex_bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Boxed, sendable future used at trait-object seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle for bidirectional streaming.
pub struct StreamHandle {
    /// Channel for sending stream items.
    pub sender: Box<dyn StreamSender>,
    /// Channel for receiving stream items.
    pub receiver: Box<dyn StreamReceiver>,
}

impl StreamHandle {
    #[must_use]
    pub fn new(sender: Box<dyn StreamSender>, receiver: Box<dyn StreamReceiver>) -> Self {
        Self { sender, receiver }
    }

    /// Create an in-process stream. The returned [`MemoryPeer`] plays the
    /// remote side.
    #[must_use]
    pub fn memory() -> (Self, MemoryPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let handle = Self {
            sender: Box::new(MemorySender {
                tx: Mutex::new(Some(outbound_tx)),
            }),
            receiver: Box::new(MemoryReceiver { rx: inbound_rx }),
        };
        let peer = MemoryPeer {
            tx: Some(inbound_tx),
            rx: outbound_rx,
        };
        (handle, peer)
    }
}

/// Trait for sending stream items.
pub trait StreamSender: Send + Sync {
    /// Send a message on the stream.
    fn send(&self, data: Bytes) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Close the send side of the stream.
    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Trait for receiving stream items.
pub trait StreamReceiver: Send {
    /// Receive the next message from the stream.
    /// Returns `None` when the stream is closed.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, TransportError>>;
}

struct MemorySender {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl StreamSender for MemorySender {
    fn send(&self, data: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        let result = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(data).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        };
        Box::pin(async move { result })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.tx.lock().take();
        Box::pin(async { Ok(()) })
    }
}

struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl StreamReceiver for MemoryReceiver {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, TransportError>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}

/// Remote end of an in-process stream.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Send a message to the local side.
    pub fn send(&self, data: Bytes) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(data).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Receive the next message written by the local side.
    /// Returns `None` once the local side has closed or been dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Stop sending; the local receiver sees end-of-stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_stream_both_directions() {
        let (mut handle, mut peer) = StreamHandle::memory();

        peer.send(Bytes::from_static(b"ping")).unwrap();
        let got = handle.receiver.recv().await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"ping"[..]));

        handle.sender.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some(&b"pong"[..]));
    }

    #[tokio::test]
    async fn test_memory_stream_close() {
        let (mut handle, mut peer) = StreamHandle::memory();

        peer.close();
        assert!(handle.receiver.recv().await.unwrap().is_none());
        assert!(peer.send(Bytes::from_static(b"late")).is_err());

        handle.sender.close().await.unwrap();
        assert!(handle.sender.send(Bytes::from_static(b"late")).await.is_err());
        assert!(peer.recv().await.is_none());
    }
}
