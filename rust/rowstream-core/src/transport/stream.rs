//! Length-prefixed frames over any byte stream.
//!
//! Wire layout per frame: `u32` little-endian frame length (descriptor plus
//! payload), the 32-byte [`MsgDesc`], then the payload.

use std::sync::Arc;

use bytes::BytesMut;
use rowstream_protocol::{DESC_SIZE, MAX_PAYLOAD_SIZE, MsgDesc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;

use crate::{Frame, TransportError};

use super::Transport;

#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport").finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: watch::Sender<bool>,
}

impl StreamTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer)
    }

    /// Create a transport from separate reader and writer streams.
    pub fn from_split<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: watch::Sender::new(false),
            }),
        }
    }

    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }

    fn is_closed_inner(&self) -> bool {
        *self.inner.closed.borrow()
    }

    async fn read_frame(&self) -> Result<Frame, TransportError> {
        let mut reader = self.inner.reader.lock().await;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len < DESC_SIZE {
            return Err(TransportError::FrameTooSmall { len: frame_len });
        }

        let mut desc_buf = [0u8; DESC_SIZE];
        reader.read_exact(&mut desc_buf).await?;
        let desc = MsgDesc::from_bytes(&desc_buf);

        let payload_len = (frame_len - DESC_SIZE) as u32;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut payload = BytesMut::zeroed(payload_len as usize);
        if payload_len > 0 {
            reader.read_exact(&mut payload).await?;
        }
        Ok(Frame::with_payload(desc, payload.freeze()))
    }
}

impl Transport for StreamTransport {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let payload = frame.payload_bytes();
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len() as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let frame_len = DESC_SIZE + payload.len();
        let mut desc = frame.desc;
        desc.payload_len = payload.len() as u32;

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&(frame_len as u32).to_le_bytes()).await?;
        writer.write_all(&desc.to_bytes()).await?;
        if !payload.is_empty() {
            writer.write_all(payload).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            frame = self.read_frame() => frame,
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        // Shut the write half so the peer reads end of stream.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            handle.spawn(async move {
                let mut writer = inner.writer.lock().await;
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(error = %e, "stream transport: write shutdown failed");
                }
            });
        }
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pipe_intact() {
        let (a, b) = StreamTransport::pair();
        let mut desc = MsgDesc::new();
        desc.channel_id = 3;
        desc.deadline_ns = 42;
        a.send_frame(Frame::with_payload(desc, b"payload".to_vec()))
            .await
            .unwrap();
        a.send_frame(Frame::new(desc)).await.unwrap();

        let first = b.recv_frame().await.unwrap();
        assert_eq!(first.desc.channel_id, 3);
        assert_eq!(first.desc.deadline_ns, 42);
        assert_eq!(first.payload_bytes(), b"payload");

        let second = b.recv_frame().await.unwrap();
        assert!(second.payload_bytes().is_empty());
        assert_eq!(second.desc.payload_len, 0);
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let (a, b) = StreamTransport::pair();
        a.close();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), b.recv_frame())
            .await
            .expect("peer should see end of stream");
        assert!(matches!(frame, Err(TransportError::Closed)));
        assert!(matches!(
            a.send_frame(Frame::new(MsgDesc::new())).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropped_peer_reads_as_closed() {
        let (a, b) = StreamTransport::pair();
        drop(a);
        assert!(matches!(b.recv_frame().await, Err(TransportError::Closed)));
    }
}
