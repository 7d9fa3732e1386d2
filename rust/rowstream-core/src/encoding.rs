//! Postcard payload encoding through facet.

use facet::Facet;

use crate::{DecodeError, EncodeError};

/// Encode a message as a frame payload.
pub fn encode<T: Facet<'static>>(value: &T) -> Result<Vec<u8>, EncodeError> {
    facet_postcard::to_vec(value).map_err(|e| EncodeError::EncodeFailed(e.to_string()))
}

/// Decode a frame payload into a message.
pub fn decode<T: Facet<'static>>(bytes: &[u8]) -> Result<T, DecodeError> {
    facet_postcard::from_slice(bytes).map_err(|e| DecodeError::InvalidData(e.to_string()))
}
