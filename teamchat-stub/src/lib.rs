//! `TeamChat` server stub library.
//!
//! Exposes the stub server for use in tests and embedding. The stub speaks
//! the same REST surface and realtime event stream as the production
//! service, backed by in-memory state, with switches to inject failures.

pub mod config;
pub mod server;
pub mod state;
