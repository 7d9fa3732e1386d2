//! Client-side channel multiplexer.
//!
//! A [`Connection`] owns one transport and carries any number of concurrent
//! server-streaming calls over it. Each call gets its own channel id and a
//! [`ResponseStream`] fed by a single demux task, which is the only reader of
//! the transport.
//!
//! Frames for a channel whose stream was dropped (for example after the
//! caller's deadline fired) are discarded by the demux loop; the server is
//! never told.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use rowstream_protocol::{CallRequest, MsgDesc, Status, method};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    AnyTransport, ErrorCode, Frame, FrameFlags, RpcError, TransportError, deadline_to_ns, decode,
    encode, max_streams,
};

struct Shared {
    transport: AnyTransport,
    /// Open streams: channel_id -> sender feeding that stream's receiver.
    streams: Mutex<HashMap<u32, mpsc::UnboundedSender<Frame>>>,
    next_msg_id: AtomicU64,
    next_channel_id: AtomicU32,
    max_streams: usize,
}

impl Shared {
    fn register(&self, channel_id: u32) -> Result<mpsc::UnboundedReceiver<Frame>, RpcError> {
        let mut streams = self.streams.lock();
        if streams.len() >= self.max_streams {
            tracing::warn!(
                open_streams = streams.len(),
                max_streams = self.max_streams,
                "too many open streams; refusing new call"
            );
            return Err(RpcError::Status {
                code: ErrorCode::ResourceExhausted,
                message: "too many open streams".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        streams.insert(channel_id, tx);
        Ok(rx)
    }

    fn route(&self, frame: Frame) {
        let channel_id = frame.channel_id();
        let sender = {
            let mut streams = self.streams.lock();
            if frame.is_eos() {
                streams.remove(&channel_id)
            } else {
                streams.get(&channel_id).cloned()
            }
        };

        match sender {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    tracing::trace!(channel_id, "stream receiver gone; frame dropped");
                }
            }
            None if channel_id != 0 && channel_id < self.next_channel_id.load(Ordering::Acquire) => {
                tracing::debug!(
                    channel_id,
                    msg_id = frame.desc.msg_id,
                    "dropping frame for abandoned stream"
                );
            }
            None => {
                tracing::warn!(
                    channel_id,
                    msg_id = frame.desc.msg_id,
                    flags = ?frame.flags(),
                    "unroutable response frame (no such stream)"
                );
            }
        }
    }
}

/// A multiplexed client connection.
///
/// Dropping the connection closes the transport and ends every stream still
/// open on it with [`TransportError::Closed`].
pub struct Connection {
    shared: Arc<Shared>,
    demux: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open_streams", &self.open_streams())
            .field("is_closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start multiplexing over `transport`. Must be called inside a tokio runtime.
    pub fn new(transport: AnyTransport) -> Self {
        let shared = Arc::new(Shared {
            transport,
            streams: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU64::new(1),
            next_channel_id: AtomicU32::new(1),
            max_streams: max_streams(),
        });
        let demux = tokio::spawn(run_demux(shared.clone()));
        Self { shared, demux }
    }

    pub fn transport(&self) -> &AnyTransport {
        &self.shared.transport
    }

    pub fn is_closed(&self) -> bool {
        self.shared.transport.is_closed()
    }

    /// Number of streams still waiting for their terminal frame.
    pub fn open_streams(&self) -> usize {
        self.shared.streams.lock().len()
    }

    /// Close the transport. Open streams end with [`TransportError::Closed`].
    pub fn close(&self) {
        self.shared.transport.close();
        self.shared.streams.lock().clear();
    }

    /// Send `request` to `method_id` and return the stream of response messages.
    ///
    /// `deadline` is propagated to the server in the frame descriptor; it is
    /// not enforced here.
    pub async fn open_stream(
        &self,
        method_id: u32,
        request: &CallRequest,
        deadline: Option<SystemTime>,
    ) -> Result<ResponseStream, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Transport(TransportError::Closed));
        }

        let channel_id = self.shared.next_channel_id.fetch_add(1, Ordering::AcqRel);
        let rx = self.shared.register(channel_id)?;
        // Constructed before sending so a failed send still unregisters.
        let stream = ResponseStream {
            shared: self.shared.clone(),
            channel_id,
            rx,
            done: false,
        };

        let payload = encode(request)?;
        let mut desc = MsgDesc::new();
        desc.msg_id = self.shared.next_msg_id.fetch_add(1, Ordering::Relaxed);
        desc.channel_id = channel_id;
        desc.method_id = method_id;
        desc.flags = (FrameFlags::DATA | FrameFlags::EOS).bits();
        desc.deadline_ns = deadline_to_ns(deadline);

        self.shared
            .transport
            .send_frame(Frame::with_payload(desc, payload))
            .await?;

        tracing::debug!(
            channel_id,
            method = method::name(method_id),
            has_deadline = desc.has_deadline(),
            "stream opened"
        );
        Ok(stream)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
        self.demux.abort();
    }
}

async fn run_demux(shared: Arc<Shared>) {
    loop {
        let frame = match shared.transport.recv_frame().await {
            Ok(frame) => frame,
            Err(TransportError::Closed) => {
                tracing::debug!("connection: transport closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection: transport error");
                break;
            }
        };

        if !frame.is_response() {
            tracing::warn!(
                channel_id = frame.channel_id(),
                method_id = frame.desc.method_id,
                "connection: ignoring non-response frame"
            );
            continue;
        }
        shared.route(frame);
    }

    // Dropping the senders ends every open stream.
    shared.streams.lock().clear();
}

/// Response messages of one call, in the order the server sent them.
pub struct ResponseStream {
    shared: Arc<Shared>,
    channel_id: u32,
    rx: mpsc::UnboundedReceiver<Frame>,
    done: bool,
}

impl ResponseStream {
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Next encoded response message.
    ///
    /// Returns `Ok(None)` once the server ends the stream with an OK status,
    /// and the status as [`RpcError::Status`] otherwise.
    pub async fn message(&mut self) -> Result<Option<Bytes>, RpcError> {
        if self.done {
            return Ok(None);
        }

        let Some(frame) = self.rx.recv().await else {
            self.done = true;
            return Err(RpcError::Transport(TransportError::Closed));
        };

        if frame.is_eos() {
            self.done = true;
            let status: Status = decode(frame.payload_bytes())?;
            tracing::trace!(channel_id = self.channel_id, code = status.code, "stream ended");
            if status.is_ok() {
                Ok(None)
            } else {
                Err(RpcError::from_status(status))
            }
        } else {
            Ok(Some(frame.payload))
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if !self.done && self.shared.streams.lock().remove(&self.channel_id).is_some() {
            tracing::debug!(
                channel_id = self.channel_id,
                "stream dropped before its end; unregistered"
            );
        }
    }
}
