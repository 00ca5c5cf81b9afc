//! Ordered, non-blocking outbound writes for one hub connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use ntex_bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use stratus_core::StreamSender;

/// Lifecycle of a [`QueuedResponseWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriterState {
    /// Nothing queued; the consumer (if started) is waiting.
    Idle = 0,
    /// The consumer is writing queued messages.
    Draining = 1,
    /// The connection went away; queued messages are being dropped.
    Disconnected = 2,
    /// The consumer has exited.
    Closed = 3,
}

impl WriterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Draining,
            2 => Self::Disconnected,
            _ => Self::Closed,
        }
    }
}

struct Pending {
    rx: mpsc::UnboundedReceiver<Bytes>,
    sender: Box<dyn StreamSender>,
}

struct Inner {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    pending: Mutex<Option<Pending>>,
    task: Mutex<Option<JoinHandle<()>>>,
    state: Arc<AtomicU8>,
    disconnected: Arc<AtomicBool>,
}

/// Per-connection FIFO in front of the outbound stream.
///
/// [`write`](Self::write) only enqueues. A single background task, started
/// on the first write, is the only code that touches the stream, so
/// messages reach the client in the order they were written no matter
/// which task wrote them.
///
/// Cloning shares the same queue.
#[derive(Clone)]
pub struct QueuedResponseWriter {
    inner: Arc<Inner>,
}

impl QueuedResponseWriter {
    /// Take ownership of the outbound stream of a connection.
    #[must_use]
    pub fn new(sender: Box<dyn StreamSender>, disconnected: Arc<AtomicBool>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                pending: Mutex::new(Some(Pending { rx, sender })),
                task: Mutex::new(None),
                state: Arc::new(AtomicU8::new(WriterState::Idle as u8)),
                disconnected,
            }),
        }
    }

    /// Queue a message.
    ///
    /// Returns `false` if the message was dropped because the writer was
    /// disposed or the connection is gone.
    pub fn write(&self, message: Bytes) -> bool {
        if self.inner.disconnected.load(Ordering::Acquire) {
            return false;
        }

        let queued = match self.inner.tx.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if queued {
            self.ensure_consumer();
        }
        queued
    }

    /// Stop accepting writes. Messages already queued are still delivered.
    pub fn dispose(&self) {
        self.inner.tx.lock().take();
    }

    /// Wait until the consumer has exited and the stream is closed.
    ///
    /// Only returns after [`dispose`](Self::dispose). Messages written
    /// while no runtime was available are delivered from here.
    pub async fn closed(&self) {
        self.ensure_consumer();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "response writer task failed");
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.tx.lock().is_none()
    }

    fn ensure_consumer(&self) {
        let mut pending = self.inner.pending.lock();
        if pending.is_none() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(error) => {
                tracing::debug!(error = %error, "no runtime, response writer starts on close");
                return;
            }
        };
        let Some(Pending { rx, sender }) = pending.take() else {
            return;
        };

        let task = handle.spawn(consume(
            rx,
            sender,
            self.inner.state.clone(),
            self.inner.disconnected.clone(),
        ));
        *self.inner.task.lock() = Some(task);
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    sender: Box<dyn StreamSender>,
    state: Arc<AtomicU8>,
    disconnected: Arc<AtomicBool>,
) {
    let set = |s: WriterState| state.store(s as u8, Ordering::Release);
    set(WriterState::Draining);

    loop {
        let message = match rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {
                set(WriterState::Idle);
                match rx.recv().await {
                    Some(message) => {
                        set(WriterState::Draining);
                        message
                    }
                    None => break,
                }
            }
        };

        if disconnected.load(Ordering::Acquire) {
            set(WriterState::Disconnected);
            tracing::debug!(dropped = rx.len() + 1, "connection gone, dropping queued writes");
            break;
        }

        if let Err(error) = sender.send(message).await {
            tracing::warn!(error = %error, "failed to write hub message");
        }
    }

    if let Err(error) = sender.close().await {
        tracing::debug!(error = %error, "closing response stream failed");
    }
    set(WriterState::Closed);
}

impl fmt::Debug for QueuedResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedResponseWriter")
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
