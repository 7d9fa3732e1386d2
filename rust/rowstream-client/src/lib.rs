//! Reference client for the rowstream table service.
//!
//! [`Client`] issues `ReadRows` and `ExecuteQuery` calls over a multiplexed
//! [`Connection`](rowstream_core::Connection), reassembles row fragments with
//! [`RowMerger`] and query batches with [`QueryAssembler`], and bounds every
//! call by a deadline.

#![deny(unsafe_code)]

mod client;
mod config;
mod error;
mod headers;
pub mod merge;
pub mod query;

pub use client::*;
pub use config::*;
pub use error::*;
pub use merge::{MergeError, RowMerger};
pub use query::{QueryAssembler, QueryError, QueryResult};
