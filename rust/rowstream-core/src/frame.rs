//! Unified frame representation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rowstream_protocol::{MsgDesc, NO_DEADLINE};

use crate::FrameFlags;

/// Owned frame for sending, receiving, or routing.
///
/// A frame is a [`MsgDesc`] plus its payload. `desc.payload_len` always
/// matches `payload.len()` for frames built through the constructors.
#[derive(Debug, Clone)]
pub struct Frame {
    pub desc: MsgDesc,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with no payload.
    pub fn new(mut desc: MsgDesc) -> Self {
        desc.payload_len = 0;
        Self {
            desc,
            payload: Bytes::new(),
        }
    }

    /// Create a frame owning `payload`.
    pub fn with_payload(mut desc: MsgDesc, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        desc.payload_len = payload.len() as u32;
        Self { desc, payload }
    }

    /// Borrow the payload as bytes.
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_raw(self.desc.flags)
    }

    pub fn channel_id(&self) -> u32 {
        self.desc.channel_id
    }

    pub fn is_eos(&self) -> bool {
        self.flags().contains(FrameFlags::EOS)
    }

    pub fn is_response(&self) -> bool {
        self.flags().contains(FrameFlags::RESPONSE)
    }
}

/// Encode an absolute deadline for [`MsgDesc::deadline_ns`].
pub fn deadline_to_ns(deadline: Option<SystemTime>) -> u64 {
    match deadline {
        Some(at) => at
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(NO_DEADLINE - 1))
            .unwrap_or(0),
        None => NO_DEADLINE,
    }
}

/// Decode [`MsgDesc::deadline_ns`] back into an absolute deadline.
pub fn deadline_from_ns(deadline_ns: u64) -> Option<SystemTime> {
    if deadline_ns == NO_DEADLINE {
        None
    } else {
        Some(UNIX_EPOCH + Duration::from_nanos(deadline_ns))
    }
}
