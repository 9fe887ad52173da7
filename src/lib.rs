//! collabd - real-time collaborative document synchronization.
//!
//! Clients edit shared documents over WebSocket; each open document lives in
//! a single room actor that merges CRDT updates, relays them to every other
//! member and persists debounced snapshots.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod network;
pub mod persistence;
pub mod server;
pub mod state;

pub use server::{Server, ServerHandle};
