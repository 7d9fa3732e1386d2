//! Runtime pieces shared by the rowstream client and the scripted server.
//!
//! - [`Frame`] and [`FrameFlags`]: the unit moved by every transport
//! - [`Transport`] with in-memory ([`transport::mem`]) and byte-stream
//!   ([`transport::stream`]) backends, erased behind [`AnyTransport`]
//! - [`Connection`]: client-side channel multiplexer
//! - [`Responder`]: server-side writer for one call's response stream

#![forbid(unsafe_code)]

mod connection;
mod encoding;
mod error;
mod flags;
mod frame;
mod limits;
mod responder;
mod transport;

pub use connection::*;
pub use encoding::*;
pub use error::*;
pub use flags::*;
pub use frame::*;
pub use limits::*;
pub use responder::*;
pub use transport::*;

pub use rowstream_protocol as protocol;
