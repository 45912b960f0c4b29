//! Shared type definitions for the `TeamChat` client sync engine.
//!
//! Entity models, typed identifiers, wire DTOs, realtime event envelopes,
//! and the durable outbox snapshot encoding: everything both the engine
//! and the backend stub agree on.

pub mod chat;
pub mod event;
pub mod ids;
pub mod message;
pub mod outbox;
pub mod rest;
