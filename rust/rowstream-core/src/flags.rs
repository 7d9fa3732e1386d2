//! Frame flags.

use bitflags::bitflags;
use rowstream_protocol::flags;

bitflags! {
    /// Flags carried in each frame descriptor.
    ///
    /// Receivers ignore bits they do not know.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u32 {
        /// Frame carries payload data.
        ///
        /// Requests are `DATA | EOS`; response messages are `DATA | RESPONSE`.
        const DATA     = flags::DATA;

        /// End of stream. On a response the payload is the terminal status.
        const EOS      = flags::EOS;

        /// The terminal status is not OK.
        const ERROR    = flags::ERROR;

        /// Frame travels from server to client.
        const RESPONSE = flags::RESPONSE;
    }
}

impl FrameFlags {
    /// Parse the raw descriptor field, dropping unknown bits.
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_truncate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_ignored() {
        let parsed = FrameFlags::from_raw(flags::DATA | flags::EOS | 0x8000_0000);
        assert_eq!(parsed, FrameFlags::DATA | FrameFlags::EOS);
    }
}
