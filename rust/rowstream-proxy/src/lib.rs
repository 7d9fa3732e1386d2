//! Operation orchestrator for conformance tests.
//!
//! A [`TestProxy`] runs [`Operation`]s on named client sessions. Sessions are
//! created on first use (or explicitly), and once closed they reject new work
//! while calls already admitted run to completion. Every outcome comes back
//! as an [`OperationResult`], so a test can assert on failures the same way
//! it asserts on rows.

#![deny(unsafe_code)]

mod config;
mod proxy;
mod result;
mod sessions;

pub use config::*;
pub use proxy::*;
pub use result::*;
pub use sessions::*;
