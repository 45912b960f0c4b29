//! `TeamChat`: offline-first sync engine for the team messaging feature.

pub mod backend;
pub mod config;
pub mod outbox;
pub mod realtime;
pub mod search;
pub mod store;
pub mod sync;
