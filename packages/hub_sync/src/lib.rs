//! Client-side synchronization for AI hub sessions.
//!
//! A hub runs many long-lived assistant sessions and streams their output to
//! every connected client over one shared websocket. This crate keeps a local
//! view consistent with the hub:
//!
//! - [`connection::ConnectionManager`] owns the socket and reconnects with backoff.
//! - [`engine::SyncEngine`] routes decoded events into the
//!   [`registry::SessionRegistry`], the [`stream::StreamState`] of the viewed
//!   session, and the [`ledger::TokenUsageLedger`].
//! - [`api::HubApi`] is the request/response side (list, send, delete, ...).

pub mod api;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod stream;

#[cfg(test)]
mod test_helpers;
