//! In-process transport.
//!
//! Frames are passed through async channels without serialization. This is
//! the reference backend: the byte-stream transport must behave the same.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::{Frame, TransportError};

use super::Transport;

/// Channel capacity for the in-proc transport.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

impl std::fmt::Debug for MemTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTransport")
            .field("is_closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct MemInner {
    /// Frames to the peer. Taken on close so the peer observes end of stream.
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Frame>>,
    closed: watch::Sender<bool>,
}

impl MemTransport {
    /// Create a connected pair of in-proc transports.
    ///
    /// Returns (A, B) where frames sent on A are received on B and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Self::from_parts(tx_b, rx_a);
        let b = Self::from_parts(tx_a, rx_b);
        (a, b)
    }

    fn from_parts(tx: mpsc::Sender<Frame>, rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            inner: Arc::new(MemInner {
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                closed: watch::Sender::new(false),
            }),
        }
    }
}

impl Transport for MemTransport {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.inner.tx.lock().clone().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        let mut rx = self.inner.rx.lock().await;
        tokio::select! {
            frame = rx.recv() => frame.ok_or(TransportError::Closed),
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.inner.tx.lock().take();
        self.inner.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}
