//! A scripted stand-in for the rowstream table service.
//!
//! Tests install one handler per method on a [`MockServer`], usually built
//! from a [`Recorder`] and a list of actions:
//!
//! ```ignore
//! let server = MockServer::start().await?;
//! let recorder = Recorder::new(1);
//! server.set_read_rows(scripted_read_rows(
//!     recorder.clone(),
//!     vec![ReadRowsAction::new(vec![
//!         ChunkData::new().row_key("row-01").family("A").qualifier("Q").value("v1").commit(),
//!     ])],
//! ));
//! ```
//!
//! Call *n* of a method plays action *n*. A single registered action is
//! replayed for every call.

#![deny(unsafe_code)]

mod handlers;
mod recorder;
mod script;
mod server;

pub use handlers::*;
pub use recorder::*;
pub use script::*;
pub use server::*;
