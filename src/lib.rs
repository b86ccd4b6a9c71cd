//! Inter-relay link transport: the TLS/link-handshake state machine, cell
//! framing, token-bucket rate limiting, and the worker event loop that
//! drives it.
//!
//! This crate is a subsystem extracted from a larger relay implementation,
//! not a standalone relay: it owns an [`channel::OrConnection`] from the
//! moment a socket is accepted or dialed through to a closed connection, and
//! nothing above that (circuit building, directory documents, descriptor
//! publication).

pub mod bucket;
pub mod cell;
pub mod channel;
mod cli;
pub mod config;
pub mod err;
pub mod event;
pub mod netloop;
pub mod pool;
pub mod safe_connection;
pub mod throughput;
mod util;

pub use err::{Error, ErrorDetail, ErrorKind, HasKind};
