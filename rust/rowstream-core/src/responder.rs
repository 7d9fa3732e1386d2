//! Server-side writer for one call's response stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use facet::Facet;
use rowstream_protocol::{MsgDesc, Status};

use crate::{AnyTransport, Frame, FrameFlags, RpcError, TransportError, encode};

/// Writes response messages for the call that arrived on `channel_id`, then
/// its terminal status.
///
/// Every frame echoes the request's channel and method ids and carries
/// [`FrameFlags::RESPONSE`]. Only the first [`finish`](Self::finish) is sent.
pub struct Responder {
    transport: AnyTransport,
    channel_id: u32,
    method_id: u32,
    msg_ids: Arc<AtomicU64>,
    finished: AtomicBool,
}

impl Responder {
    /// `msg_ids` is shared by every responder on the same transport.
    pub fn new(transport: AnyTransport, request: &MsgDesc, msg_ids: Arc<AtomicU64>) -> Self {
        Self {
            transport,
            channel_id: request.channel_id,
            method_id: request.method_id,
            msg_ids,
            finished: AtomicBool::new(false),
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn desc(&self, flags: FrameFlags) -> MsgDesc {
        let mut desc = MsgDesc::new();
        desc.msg_id = self.msg_ids.fetch_add(1, Ordering::Relaxed);
        desc.channel_id = self.channel_id;
        desc.method_id = self.method_id;
        desc.flags = (flags | FrameFlags::RESPONSE).bits();
        desc
    }

    /// Send one response message.
    pub async fn send<T: Facet<'static>>(&self, message: &T) -> Result<(), RpcError> {
        if self.is_finished() {
            return Err(RpcError::Transport(TransportError::Closed));
        }
        let payload = encode(message)?;
        let frame = Frame::with_payload(self.desc(FrameFlags::DATA), payload);
        self.transport.send_frame(frame).await?;
        Ok(())
    }

    /// End the stream with `status`.
    pub async fn finish(&self, status: Status) -> Result<(), RpcError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                channel_id = self.channel_id,
                "responder: stream already finished; status dropped"
            );
            return Ok(());
        }
        let mut flags = FrameFlags::EOS;
        if !status.is_ok() {
            flags |= FrameFlags::ERROR;
        }
        let payload = encode(&status)?;
        let frame = Frame::with_payload(self.desc(flags), payload);
        tracing::trace!(
            channel_id = self.channel_id,
            code = status.code,
            "responder: sending terminal status"
        );
        self.transport.send_frame(frame).await?;
        Ok(())
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.is_finished() {
            tracing::warn!(
                channel_id = self.channel_id,
                "responder dropped without a terminal status"
            );
        }
    }
}
