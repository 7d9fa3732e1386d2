//! Frame transports.
//!
//! Backends implement [`Transport`]: [`mem`] for in-process pairs and
//! [`stream`] for anything byte-oriented (TCP, duplex pipes). Connections and
//! the mock server only ever see the erased [`AnyTransport`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Frame, TransportError};

/// An ordered, bidirectional frame pipe.
///
/// After [`close`](Transport::close), blocked and later `recv_frame` calls
/// return [`TransportError::Closed`] and the peer observes end of stream.
pub trait Transport: Send + Sync + Clone + 'static {
    fn send_frame(
        &self,
        frame: Frame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + '_;

    /// Next frame from the peer.
    fn recv_frame(&self) -> impl Future<Output = Result<Frame, TransportError>> + Send + '_;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Boxed-future form of [`Transport`], usable as a trait object.
pub trait DynTransport: Send + Sync + 'static {
    fn send_boxed(
        &self,
        frame: Frame,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    fn recv_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Frame, TransportError>> + Send + '_>>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

impl<T: Transport> DynTransport for T {
    fn send_boxed(
        &self,
        frame: Frame,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(self.send_frame(frame))
    }

    fn recv_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Frame, TransportError>> + Send + '_>> {
        Box::pin(self.recv_frame())
    }

    fn close(&self) {
        Transport::close(self)
    }

    fn is_closed(&self) -> bool {
        Transport::is_closed(self)
    }
}

/// A shared handle to some [`Transport`].
///
/// The client and the scripted server both hold one, so a test can swap TCP
/// for the in-memory pair without touching either side.
#[derive(Clone)]
pub struct AnyTransport {
    inner: Arc<dyn DynTransport>,
}

impl std::fmt::Debug for AnyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyTransport")
            .field("is_closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl AnyTransport {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self {
            inner: Arc::new(transport),
        }
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.inner.send_boxed(frame).await
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        self.inner.recv_boxed().await
    }

    pub fn close(&self) {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Two connected in-memory ends.
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Self::new(a), Self::new(b))
    }

    /// Frame a byte stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Self::new(stream::StreamTransport::new(stream))
    }

    /// Two stream transports joined by an in-process duplex pipe.
    pub fn stream_pair() -> (Self, Self) {
        let (a, b) = stream::StreamTransport::pair();
        (Self::new(a), Self::new(b))
    }

    /// Dial `addr` with Nagle disabled.
    pub async fn connect_tcp(addr: impl tokio::net::ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = tokio::net::TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        Ok(Self::stream(socket))
    }
}

impl Transport for AnyTransport {
    fn send_frame(
        &self,
        frame: Frame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + '_ {
        self.inner.send_boxed(frame)
    }

    fn recv_frame(&self) -> impl Future<Output = Result<Frame, TransportError>> + Send + '_ {
        self.inner.recv_boxed()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

pub mod mem;
pub mod stream;
